use std::time::Duration;

use crate::{
    bson::{DateTime, Document, ObjectId},
    bson_util,
    client::options::ServerAddress,
    error::{Error, Result},
    hello::HelloReply,
    selection_criteria::TagSet,
};

const DRIVER_MIN_DB_VERSION: &str = "2.6";
const DRIVER_MIN_WIRE_VERSION: i32 = 0;
const DRIVER_MAX_WIRE_VERSION: i32 = 21;

/// The possible types of servers that the driver can connect to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, derive_more::Display)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replica set mongod.
    Standalone,

    /// A router used in sharded deployments.
    Mongos,

    /// The primary node in a replica set.
    RsPrimary,

    /// A secondary node in a replica set.
    RsSecondary,

    /// A non-data bearing node in a replica set which can participate in elections.
    RsArbiter,

    /// Hidden, starting up, or recovering nodes in a replica set.
    RsOther,

    /// A member of an uninitialized replica set or a member that has been removed from the
    /// replica set config.
    RsGhost,

    /// A server that the driver hasn't yet communicated with or can't connect to.
    #[default]
    Unknown,
}

impl ServerType {
    pub(crate) fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::Mongos
        )
    }

    pub(crate) fn is_available(self) -> bool {
        !matches!(self, ServerType::Unknown)
    }
}

/// Models the `topologyVersion` field included in hello replies and command errors on
/// recent servers. Used to discard stale monitoring updates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct TopologyVersion {
    pub(crate) process_id: ObjectId,
    pub(crate) counter: i64,
}

impl TopologyVersion {
    pub(crate) fn parse(doc: &Document) -> Option<Self> {
        Some(Self {
            process_id: doc.get_object_id("processId")?,
            counter: doc.get("counter").and_then(bson_util::get_int)?,
        })
    }

    #[allow(unused)]
    pub(crate) fn is_more_recent_than(&self, existing: TopologyVersion) -> bool {
        self.process_id != existing.process_id || self.counter > existing.counter
    }
}

/// A description of the most up-to-date information known about a server.
#[derive(Debug, Clone)]
pub(crate) struct ServerDescription {
    /// The address of this server.
    pub(crate) address: ServerAddress,

    /// The type of this server.
    pub(crate) server_type: ServerType,

    /// The last time this server was updated.
    pub(crate) last_update_time: Option<DateTime>,

    /// The average duration of this server's hello calls.
    pub(crate) average_round_trip_time: Option<Duration>,

    // A server description needs to hold an error message when the heartbeat fails, an
    // empty slot before the first heartbeat, or the reply. Storing a Result of an Option
    // makes the invalid combinations (error and reply at once) unrepresentable while
    // letting the accessors below propagate heartbeat errors with `?`.
    pub(crate) reply: Result<Option<HelloReply>>,
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        if self.address != other.address || self.server_type != other.server_type {
            return false;
        }

        match (self.reply.as_ref(), other.reply.as_ref()) {
            (Ok(self_reply), Ok(other_reply)) => {
                let a = self_reply.as_ref().map(|r| &r.command_response);
                let b = other_reply.as_ref().map(|r| &r.command_response);
                a == b
            }
            (Err(self_err), Err(other_err)) => self_err.to_string() == other_err.to_string(),
            _ => false,
        }
    }
}

impl ServerDescription {
    pub(crate) fn new(address: &ServerAddress) -> Self {
        Self {
            address: ServerAddress::Tcp {
                host: address.host().to_lowercase(),
                port: Some(address.port()),
            },
            server_type: Default::default(),
            last_update_time: None,
            average_round_trip_time: None,
            reply: Ok(None),
        }
    }

    pub(crate) fn new_from_hello_reply(
        address: &ServerAddress,
        reply: HelloReply,
        average_rtt: Duration,
    ) -> Self {
        let mut description = Self::new(address);
        description.average_round_trip_time = Some(average_rtt);
        description.last_update_time = Some(DateTime::now());
        description.server_type = reply.command_response.server_type();
        description.reply = Ok(Some(reply));
        description
    }

    pub(crate) fn new_from_error(address: &ServerAddress, error: Error) -> Self {
        let mut description = Self::new(address);
        description.last_update_time = Some(DateTime::now());
        description.average_round_trip_time = None;
        description.reply = Err(error);
        description
    }

    /// Whether this server is available as a selection candidate.
    pub(crate) fn is_available(&self) -> bool {
        self.server_type.is_available()
    }

    pub(crate) fn compatibility_error_message(&self) -> Option<String> {
        if let Ok(Some(ref reply)) = self.reply {
            let hello_min_wire_version = reply.command_response.min_wire_version.unwrap_or(0);

            if hello_min_wire_version > DRIVER_MAX_WIRE_VERSION {
                return Some(format!(
                    "Server at {} requires wire version {}, but this driver only supports up \
                     to {}",
                    self.address, hello_min_wire_version, DRIVER_MAX_WIRE_VERSION,
                ));
            }

            let hello_max_wire_version = reply.command_response.max_wire_version.unwrap_or(0);

            if hello_max_wire_version < DRIVER_MIN_WIRE_VERSION {
                return Some(format!(
                    "Server at {} reports wire version {}, but this driver requires at least \
                     {} (MongoDB {}).",
                    self.address,
                    hello_max_wire_version,
                    DRIVER_MIN_WIRE_VERSION,
                    DRIVER_MIN_DB_VERSION
                ));
            }
        }

        None
    }

    pub(crate) fn set_name(&self) -> Result<Option<String>> {
        let set_name = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.set_name.clone());
        Ok(set_name)
    }

    /// The members this server believes make up the set, from the `hosts`, `passives`,
    /// and `arbiters` fields of its hello reply.
    pub(crate) fn known_hosts(&self) -> Result<Vec<ServerAddress>> {
        let known_hosts = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .map(|reply| {
                let hosts = reply.command_response.hosts.as_ref();
                let passives = reply.command_response.passives.as_ref();
                let arbiters = reply.command_response.arbiters.as_ref();

                hosts
                    .into_iter()
                    .flatten()
                    .chain(passives.into_iter().flatten())
                    .chain(arbiters.into_iter().flatten())
            });

        known_hosts
            .into_iter()
            .flatten()
            .map(ServerAddress::parse)
            .collect()
    }

    /// Whether the server's `me` field disagrees with the address we reached it at.
    pub(crate) fn invalid_me(&self) -> Result<bool> {
        if let Some(ref reply) = self.reply.as_ref().map_err(Clone::clone)? {
            if let Some(ref me) = reply.command_response.me {
                return Ok(&self.address.to_string() != me);
            }
        }

        Ok(false)
    }

    pub(crate) fn set_version(&self) -> Result<Option<i32>> {
        let set_version = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.set_version);
        Ok(set_version)
    }

    pub(crate) fn election_id(&self) -> Result<Option<ObjectId>> {
        let election_id = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.election_id);
        Ok(election_id)
    }

    pub(crate) fn primary(&self) -> Result<Option<String>> {
        let primary = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.primary.clone());
        Ok(primary)
    }

    pub(crate) fn max_wire_version(&self) -> Result<Option<i32>> {
        let version = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.max_wire_version);
        Ok(version)
    }

    pub(crate) fn last_write_date(&self) -> Result<Option<DateTime>> {
        match self.reply {
            Ok(None) => Ok(None),
            Ok(Some(ref reply)) => Ok(reply
                .command_response
                .last_write
                .as_ref()
                .map(|write| write.last_write_date)),
            Err(ref e) => Err(e.clone()),
        }
    }

    pub(crate) fn tags(&self) -> Option<TagSet> {
        match self.reply {
            Ok(Some(ref reply)) => reply.command_response.tags.clone(),
            _ => None,
        }
    }

    pub(crate) fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        let reply = match self.reply.as_ref() {
            Ok(Some(ref reply)) => reply,
            _ => return false,
        };

        let server_tags = match reply.command_response.tags {
            Some(ref tags) => tags,
            None => return false,
        };

        tag_set
            .iter()
            .all(|(key, val)| server_tags.get(key) == Some(val))
    }
}
