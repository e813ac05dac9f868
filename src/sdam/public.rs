//! Public-facing views of topology state.

use std::{borrow::Cow, fmt, time::Duration};

use crate::{client::options::ServerAddress, selection_criteria::TagSet};

use super::{description::server::ServerDescription, ServerType};

/// A description of the most up-to-date information known about a server. Selection
/// predicates receive these.
#[derive(Clone)]
pub struct ServerInfo<'a> {
    description: Cow<'a, ServerDescription>,
}

impl<'a> ServerInfo<'a> {
    pub(crate) fn new_borrowed(description: &'a ServerDescription) -> Self {
        Self {
            description: Cow::Borrowed(description),
        }
    }

    /// Gets the address of the server.
    pub fn address(&self) -> &ServerAddress {
        &self.description.address
    }

    /// Gets the type of the server.
    pub fn server_type(&self) -> ServerType {
        self.description.server_type
    }

    /// Gets the weighted average of the time it has taken for a server check to round-trip
    /// to this server.
    pub fn average_round_trip_time(&self) -> Option<Duration> {
        self.description.average_round_trip_time
    }

    /// Gets the replica set tags of the server, if any.
    pub fn tags(&self) -> Option<TagSet> {
        self.description.tags()
    }

    /// The error from the most recent check of this server, if it failed.
    pub fn error(&self) -> Option<&crate::error::Error> {
        self.description.reply.as_ref().err()
    }
}

impl fmt::Debug for ServerInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ServerInfo")
            .field("address", self.address())
            .field("server_type", &self.server_type())
            .field("average_round_trip_time", &self.average_round_trip_time())
            .finish()
    }
}

impl fmt::Display for ServerInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ Address: {}, Type: {:?} }}",
            self.address(),
            self.server_type()
        )
    }
}
