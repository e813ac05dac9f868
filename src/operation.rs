mod aggregate;
mod count;
mod delete;
mod drop;
mod find;
mod get_more;
mod insert;
mod kill_cursors;
mod run_command;
mod update;

use std::collections::VecDeque;

use crate::{
    bson::{Bson, Document},
    bson_util,
    cmap::{wire::MessageBody, Command, StreamDescription},
    coll::Namespace,
    concern::WriteConcern,
    error::{BulkWriteError, Result, WriteConcernError},
    selection_criteria::SelectionCriteria,
};

pub(crate) use aggregate::Aggregate;
pub(crate) use count::Count;
pub(crate) use delete::{Delete, DeleteStatement};
pub(crate) use drop::{DropCollection, DropDatabase};
pub(crate) use find::Find;
pub(crate) use get_more::GetMore;
pub(crate) use insert::{check_document_validation, Insert};
pub(crate) use kill_cursors::KillCursors;
pub(crate) use run_command::RunCommand;
pub(crate) use update::{Update, UpdateStatement};

/// The amount of overhead bytes to account for when packing operations into a write
/// command on top of the documents themselves.
pub(crate) const COMMAND_OVERHEAD_SIZE: i64 = 16 * 1024;

/// A trait modeling the behavior of a server side operation: building the command for a
/// given server's limits and interpreting its reply.
pub(crate) trait Operation {
    /// The output type of this operation.
    type O;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    /// The operation may store some additional state that is required for handling the
    /// response.
    fn build(&mut self, description: &StreamDescription) -> Result<Command>;

    /// For write operations, the legacy opcode bodies to dispatch instead of a write
    /// command when the selected server predates write commands. Only consulted for
    /// unacknowledged writes.
    fn build_legacy(
        &mut self,
        _description: &StreamDescription,
    ) -> Result<Option<Vec<MessageBody>>> {
        Ok(None)
    }

    /// Interprets the server response to the command. `response` has already been checked
    /// for an `ok: 0` command failure.
    fn handle_response(
        &self,
        response: &Document,
        description: &StreamDescription,
    ) -> Result<Self::O>;

    /// Criteria to use for selecting the server that this operation will be executed on.
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    /// Whether or not this operation will request acknowledgment from the server.
    fn is_acknowledged(&self) -> bool {
        self.write_concern()
            .map(WriteConcern::is_acknowledged)
            .unwrap_or(true)
    }

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// The level of retryability the operation supports.
    fn retryability(&self) -> Retryability {
        Retryability::None
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub(crate) enum Retryability {
    Write,
    Read,
    None,
}

/// Appends the caller-supplied extra options of an operation onto a command body.
pub(crate) fn append_options(doc: &mut Document, options: Option<&Document>) {
    if let Some(options) = options {
        doc.extend(options.clone());
    }
}

/// The `cursor` portion of a find/aggregate/getMore reply.
#[derive(Debug, Clone)]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,
    pub(crate) ns: Namespace,
    pub(crate) batch: VecDeque<Document>,
}

impl CursorInfo {
    /// Parses `{ cursor: { id, ns, <batch_key>: [...] } }`.
    pub(crate) fn parse(response: &Document, batch_key: &str) -> Result<Self> {
        let cursor = response
            .get_document("cursor")
            .ok_or_else(|| crate::error::Error::invalid_response("reply is missing `cursor`"))?;
        let id = cursor
            .get("id")
            .and_then(bson_util::get_int)
            .ok_or_else(|| crate::error::Error::invalid_response("cursor is missing `id`"))?;
        let ns = cursor
            .get_str("ns")
            .and_then(|ns| ns.parse::<Namespace>().ok())
            .ok_or_else(|| crate::error::Error::invalid_response("cursor is missing `ns`"))?;
        let batch = cursor
            .get_array(batch_key)
            .ok_or_else(|| {
                crate::error::Error::invalid_response(format!("cursor is missing `{}`", batch_key))
            })?
            .iter()
            .filter_map(|doc| doc.as_document().cloned())
            .collect();
        Ok(Self { id, ns, batch })
    }
}

/// The shared body of a write command reply: the affected count plus any per-op or write
/// concern errors.
#[derive(Debug, Clone, Default)]
pub(crate) struct WriteResponseBody {
    pub(crate) n: i64,
    pub(crate) n_modified: i64,
    pub(crate) upserted: Vec<(usize, Bson)>,
    pub(crate) write_errors: Vec<BulkWriteError>,
    pub(crate) write_concern_error: Option<WriteConcernError>,
    pub(crate) labels: Vec<String>,
}

impl WriteResponseBody {
    pub(crate) fn parse(response: &Document) -> Self {
        let write_errors = response
            .get_array("writeErrors")
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(Bson::as_document)
                    .map(BulkWriteError::from_document)
                    .collect()
            })
            .unwrap_or_default();

        let upserted = response
            .get_array("upserted")
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Bson::as_document)
                    .filter_map(|entry| {
                        let index = entry.get("index").and_then(bson_util::get_int)?;
                        let id = entry.get("_id")?.clone();
                        Some((index.max(0) as usize, id))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            n: response.get("n").and_then(bson_util::get_int).unwrap_or(0),
            n_modified: response
                .get("nModified")
                .and_then(bson_util::get_int)
                .unwrap_or(0),
            upserted,
            write_errors,
            write_concern_error: response
                .get_document("writeConcernError")
                .map(WriteConcernError::from_document),
            labels: response
                .get_array("errorLabels")
                .map(|arr| {
                    arr.iter()
                        .filter_map(Bson::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// A write command reply paired with how many operations the command carried, so the
/// coordinator can re-base batch-relative indexes into the caller's index space.
#[derive(Debug, Clone)]
pub(crate) struct BatchOutcome {
    pub(crate) body: WriteResponseBody,
    pub(crate) n_attempted: usize,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::doc;

    #[test]
    fn cursor_info_parsing() {
        let response = doc! {
            "ok": 1,
            "cursor": doc! {
                "id": 42i64,
                "ns": "db.coll",
                "firstBatch": vec![doc! { "a": 1 }, doc! { "a": 2 }],
            },
        };
        let info = CursorInfo::parse(&response, "firstBatch").unwrap();
        assert_eq!(info.id, 42);
        assert_eq!(info.ns.to_string(), "db.coll");
        assert_eq!(info.batch.len(), 2);
    }

    #[test]
    fn write_response_parsing() {
        let response = doc! {
            "ok": 1,
            "n": 2,
            "nModified": 1,
            "upserted": vec![doc! { "index": 1, "_id": 7 }],
            "writeErrors": vec![doc! { "index": 0, "code": 11000, "errmsg": "dup" }],
        };
        let body = WriteResponseBody::parse(&response);
        assert_eq!(body.n, 2);
        assert_eq!(body.n_modified, 1);
        assert_eq!(body.upserted, vec![(1, crate::bson::Bson::Int32(7))]);
        assert_eq!(body.write_errors.len(), 1);
        assert_eq!(body.write_errors[0].code, 11000);
        assert!(body.write_concern_error.is_none());
    }
}
