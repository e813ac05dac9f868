pub(crate) mod description;
pub(crate) mod monitor;
pub mod public;
pub(crate) mod server;
pub(crate) mod topology;

use std::time::Duration;

pub use self::{
    description::{server::ServerType, topology::TopologyType},
    public::ServerInfo,
};
pub(crate) use self::{
    description::{
        server::{ServerDescription, TopologyVersion},
        topology::TopologyDescription,
    },
    server::Server,
    topology::Topology,
};

/// The amount of time a monitor waits between heartbeats by default.
pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);

/// The default deadline for server selection.
pub(crate) const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);
