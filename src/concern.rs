//! Contains the types for write concerns.

use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    error::{ErrorKind, Result},
};

/// Specifies the level of acknowledgement requested from the server for write operations.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/reference/write-concern/) for more
/// information about write concerns.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct WriteConcern {
    /// Requests acknowledgement that the operation has propagated to a specific number or
    /// variety of servers.
    pub w: Option<Acknowledgment>,

    /// Requests acknowledgement that the operation has propagated to the on-disk journal.
    pub journal: Option<bool>,

    /// Specifies a time limit for the write concern to be satisfied. This does not cause
    /// write operations to be aborted, only acknowledgement to time out.
    pub w_timeout: Option<Duration>,

    /// Requests that the server flush data to disk before acknowledging. Deprecated by
    /// servers in favor of `journal`; retained for old deployments.
    pub fsync: Option<bool>,
}

/// The type of the `w` field in a [`WriteConcern`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Acknowledgment {
    /// Requires acknowledgement that the write has reached the specified number of nodes.
    /// A value of 0 makes the write unacknowledged: the driver sends the operation and does
    /// not wait for a reply.
    Nodes(u32),

    /// Requires acknowledgement that the write has reached a majority of nodes.
    Majority,

    /// Requires acknowledgement according to the given custom write concern mode. See
    /// [here](https://www.mongodb.com/docs/manual/tutorial/configure-replica-set-tag-sets/#tag-sets-and-custom-write-concern-behavior)
    /// for more information.
    Custom(String),
}

impl From<u32> for Acknowledgment {
    fn from(i: u32) -> Self {
        Acknowledgment::Nodes(i)
    }
}

impl From<String> for Acknowledgment {
    fn from(s: String) -> Self {
        if s == "majority" {
            Acknowledgment::Majority
        } else {
            Acknowledgment::Custom(s)
        }
    }
}

impl Acknowledgment {
    fn to_bson(&self) -> Bson {
        match self {
            Acknowledgment::Nodes(i) => Bson::Int32(*i as i32),
            Acknowledgment::Majority => Bson::String("majority".to_string()),
            Acknowledgment::Custom(s) => Bson::String(s.clone()),
        }
    }
}

impl WriteConcern {
    /// A write concern requiring acknowledgement from the given number of nodes.
    pub fn nodes(n: u32) -> Self {
        Self::builder().w(Some(Acknowledgment::Nodes(n))).build()
    }

    /// A write concern requiring acknowledgement from a majority of nodes.
    pub fn majority() -> Self {
        Self::builder().w(Some(Acknowledgment::Majority)).build()
    }

    /// An unacknowledged write concern: operations are sent without waiting for a reply.
    pub fn unacknowledged() -> Self {
        Self::nodes(0)
    }

    /// Whether this write concern requests any acknowledgement from the server. An empty
    /// write concern is acknowledged, since the server default applies.
    pub fn is_acknowledged(&self) -> bool {
        self.w != Some(Acknowledgment::Nodes(0)) || self.journal == Some(true)
    }

    /// Whether any field is set.
    pub(crate) fn is_empty(&self) -> bool {
        self.w.is_none() && self.journal.is_none() && self.w_timeout.is_none() && self.fsync.is_none()
    }

    /// Validates that the write concern is self-consistent.
    pub fn validate(&self) -> Result<()> {
        if self.w == Some(Acknowledgment::Nodes(0)) && self.journal == Some(true) {
            return Err(ErrorKind::InvalidArgument {
                message: "write concern cannot have w=0 and journal=true".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// The document form appended to write commands under `writeConcern`.
    pub(crate) fn to_document(&self) -> Document {
        let mut doc = Document::new();
        if let Some(ref w) = self.w {
            doc.insert("w", w.to_bson());
        }
        if let Some(journal) = self.journal {
            doc.insert("j", journal);
        }
        if let Some(w_timeout) = self.w_timeout {
            doc.insert("wtimeout", w_timeout.as_millis() as i64);
        }
        if let Some(fsync) = self.fsync {
            doc.insert("fsync", fsync);
        }
        doc
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unacknowledged_with_journal_is_invalid() {
        let wc = WriteConcern::builder()
            .w(Some(Acknowledgment::Nodes(0)))
            .journal(Some(true))
            .build();
        assert!(wc.validate().is_err());
    }

    #[test]
    fn acknowledgement_detection() {
        assert!(!WriteConcern::unacknowledged().is_acknowledged());
        assert!(WriteConcern::nodes(1).is_acknowledged());
        assert!(WriteConcern::majority().is_acknowledged());
        assert!(WriteConcern::default().is_acknowledged());
    }

    #[test]
    fn document_form() {
        let wc = WriteConcern::builder()
            .w(Some(Acknowledgment::Majority))
            .w_timeout(Some(Duration::from_millis(200)))
            .build();
        let doc = wc.to_document();
        assert_eq!(doc.get_str("w"), Some("majority"));
        assert_eq!(doc.get_i64("wtimeout"), Some(200));
    }
}
