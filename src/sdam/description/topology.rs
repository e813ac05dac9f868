pub(crate) mod server_selection;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::{
    bson::ObjectId,
    client::options::{ClientOptions, ServerAddress},
    cmap::Command,
    error::{Error, Result},
    sdam::{
        description::server::{ServerDescription, ServerType},
        DEFAULT_HEARTBEAT_FREQUENCY,
    },
    selection_criteria::{ReadPreference, SelectionCriteria},
};

/// The possible types for a topology.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, derive_more::Display)]
#[non_exhaustive]
pub enum TopologyType {
    /// A single mongod server.
    Single,

    /// A replica set with no primary.
    ReplicaSetNoPrimary,

    /// A replica set with a primary.
    ReplicaSetWithPrimary,

    /// A sharded topology.
    Sharded,

    /// A topology whose type is not known.
    #[default]
    Unknown,
}

/// A description of the most up-to-date information known about a topology. Owned by the
/// topology and published to readers as immutable snapshots.
#[derive(Debug, Clone)]
pub(crate) struct TopologyDescription {
    /// Whether or not the topology was initialized with a single seed.
    pub(crate) single_seed: bool,

    /// The current type of the topology.
    pub(crate) topology_type: TopologyType,

    /// The replica set name of the topology.
    pub(crate) set_name: Option<String>,

    /// The highest replica set version the driver has seen by a member of the topology.
    pub(crate) max_set_version: Option<i32>,

    /// The highest replica set election id the driver has seen by a member of the topology.
    pub(crate) max_election_id: Option<ObjectId>,

    /// Describes the compatibility issue between the driver and server with regards to the
    /// respective supported wire versions, if any.
    pub(crate) compatibility_error: Option<String>,

    /// The amount of latency beyond that of the suitable server with the minimum latency
    /// that is acceptable for a read operation.
    pub(crate) local_threshold: Option<Duration>,

    /// The maximum amount of time to wait before checking a given server by sending a
    /// heartbeat.
    pub(crate) heartbeat_freq: Option<Duration>,

    /// The server descriptions of each member of the topology, keyed by address.
    pub(crate) servers: HashMap<ServerAddress, ServerDescription>,
}

impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        // Only the fields that server selection reads are compared: equality decides
        // whether waiting selection attempts are woken up.
        self.compatibility_error == other.compatibility_error
            && self.servers == other.servers
            && self.topology_type == other.topology_type
    }
}

impl Default for TopologyDescription {
    fn default() -> Self {
        Self {
            single_seed: false,
            topology_type: TopologyType::Unknown,
            set_name: None,
            max_set_version: None,
            max_election_id: None,
            compatibility_error: None,
            local_threshold: None,
            heartbeat_freq: None,
            servers: Default::default(),
        }
    }
}

impl TopologyDescription {
    pub(crate) fn initialize(&mut self, options: &ClientOptions) {
        debug_assert!(
            self.servers.is_empty() && self.topology_type == TopologyType::Unknown,
            "new TopologyDescriptions should start empty"
        );

        self.topology_type = if let Some(true) = options.direct_connection {
            TopologyType::Single
        } else if options.repl_set_name.is_some() {
            TopologyType::ReplicaSetNoPrimary
        } else {
            TopologyType::Unknown
        };

        for address in options.hosts.iter() {
            let description = ServerDescription::new(address);
            self.servers.insert(description.address.clone(), description);
        }

        self.single_seed = self.servers.len() == 1;
        self.set_name.clone_from(&options.repl_set_name);
        self.local_threshold = options.local_threshold;
        self.heartbeat_freq = options.heartbeat_freq;
    }

    /// Gets the topology type of the cluster.
    pub(crate) fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub(crate) fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    pub(crate) fn get_server_description(
        &self,
        address: &ServerAddress,
    ) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    pub(crate) fn compatibility_error(&self) -> Option<&String> {
        self.compatibility_error.as_ref()
    }

    /// Gets the heartbeat frequency.
    pub(crate) fn heartbeat_frequency(&self) -> Duration {
        self.heartbeat_freq.unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY)
    }

    /// When the selected server is a mongos, reads with a non-primary preference carry an
    /// explicit `$readPreference` so the router can forward it.
    pub(crate) fn update_command_with_read_pref(
        &self,
        address: &ServerAddress,
        command: &mut Command,
        criteria: Option<&SelectionCriteria>,
    ) {
        let server_type = self
            .get_server_description(address)
            .map(|sd| sd.server_type)
            .unwrap_or(ServerType::Unknown);

        if !matches!(server_type, ServerType::Mongos) {
            return;
        }
        let read_preference = match criteria {
            Some(SelectionCriteria::ReadPreference(rp)) => rp,
            _ => return,
        };
        match read_preference {
            ReadPreference::Primary => {}
            other => command.set_read_preference(other.clone()),
        }
    }

    /// Check the cluster for a compatibility error, and record the error message if one is
    /// found.
    fn check_compatibility(&mut self) {
        self.compatibility_error = None;

        for server in self.servers.values() {
            let error_message = server.compatibility_error_message();

            if error_message.is_some() {
                self.compatibility_error = error_message;
                return;
            }
        }
    }

    /// Replaces a server's description with an unknown one carrying `error`, as happens
    /// when an application operation hits a network error or a "not master" reply.
    pub(crate) fn mark_server_unknown(&mut self, address: &ServerAddress, error: Error) {
        if !self.servers.contains_key(address) {
            return;
        }
        self.servers.insert(
            address.clone(),
            ServerDescription::new_from_error(address, error),
        );
        if matches!(
            self.topology_type,
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary
        ) {
            self.check_if_has_primary();
        }
    }

    /// Incorporates a fresh server description produced by a monitor check, running the
    /// topology state machine. Returns the addresses of any newly discovered servers that
    /// need monitoring.
    pub(crate) fn update(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<Vec<ServerAddress>> {
        // A check for a server that has since been removed is stale; ignore it.
        if !self.servers.contains_key(&server_description.address) {
            return Ok(Vec::new());
        }

        let addresses_before: HashSet<ServerAddress> = self.servers.keys().cloned().collect();
        let server_type = server_description.server_type;
        let address = server_description.address.clone();

        self.servers
            .insert(address.clone(), server_description.clone());

        match (self.topology_type, server_type) {
            (TopologyType::Single, _) => {
                // A direct connection tracks its one server whatever it reports.
            }
            (_, ServerType::Unknown) | (_, ServerType::RsGhost) => {
                if matches!(
                    self.topology_type,
                    TopologyType::ReplicaSetWithPrimary
                ) {
                    self.check_if_has_primary();
                }
            }
            (TopologyType::Unknown, ServerType::Standalone) => {
                if self.single_seed {
                    self.topology_type = TopologyType::Single;
                } else {
                    self.servers.remove(&address);
                }
            }
            (TopologyType::Unknown, ServerType::Mongos) => {
                self.topology_type = TopologyType::Sharded;
            }
            (TopologyType::Unknown, ServerType::RsPrimary) => {
                self.update_rs_from_primary(server_description)?;
            }
            (
                TopologyType::Unknown,
                ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther,
            ) => {
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                self.update_rs_without_primary(server_description)?;
            }
            (TopologyType::Sharded, ServerType::Mongos) => {}
            (TopologyType::Sharded, _) => {
                self.servers.remove(&address);
            }
            (TopologyType::ReplicaSetNoPrimary, ServerType::Standalone | ServerType::Mongos) => {
                self.servers.remove(&address);
            }
            (TopologyType::ReplicaSetNoPrimary, ServerType::RsPrimary) => {
                self.update_rs_from_primary(server_description)?;
            }
            (
                TopologyType::ReplicaSetNoPrimary,
                ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther,
            ) => {
                self.update_rs_without_primary(server_description)?;
            }
            (
                TopologyType::ReplicaSetWithPrimary,
                ServerType::Standalone | ServerType::Mongos,
            ) => {
                self.servers.remove(&address);
                self.check_if_has_primary();
            }
            (TopologyType::ReplicaSetWithPrimary, ServerType::RsPrimary) => {
                self.update_rs_from_primary(server_description)?;
            }
            (
                TopologyType::ReplicaSetWithPrimary,
                ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther,
            ) => {
                self.update_rs_with_primary_from_member(server_description)?;
            }
        }

        self.check_compatibility();

        Ok(self
            .servers
            .keys()
            .filter(|addr| !addresses_before.contains(addr))
            .cloned()
            .collect())
    }

    /// Updates the topology based on a reply from the primary, which is authoritative for
    /// the member list. A primary whose `(setVersion, electionId)` pair is older than the
    /// maximum already seen is stale and marked unknown instead.
    fn update_rs_from_primary(&mut self, server_description: ServerDescription) -> Result<()> {
        let address = server_description.address.clone();

        if self.set_name.is_none() {
            self.set_name = server_description.set_name()?;
        } else if self.set_name != server_description.set_name()? {
            self.servers.remove(&address);
            self.check_if_has_primary();
            return Ok(());
        }

        if let Some(server_set_version) = server_description.set_version()? {
            let stale = match (self.max_set_version, self.max_election_id) {
                (Some(max_set_version), Some(max_election_id)) => {
                    match server_description.election_id()? {
                        Some(election_id) => {
                            max_set_version > server_set_version
                                || (max_set_version == server_set_version
                                    && max_election_id > election_id)
                        }
                        None => false,
                    }
                }
                _ => false,
            };

            if stale {
                self.servers.insert(
                    address.clone(),
                    ServerDescription::new_from_error(
                        &address,
                        Error::internal("primary marked stale due to electionId/setVersion mismatch"),
                    ),
                );
                self.check_if_has_primary();
                return Ok(());
            }

            if let Some(election_id) = server_description.election_id()? {
                self.max_election_id = Some(election_id);
            }
            self.max_set_version = Some(server_set_version);
        }

        // There can be only one primary; any other one is from a stale view.
        let other_primaries: Vec<ServerAddress> = self
            .servers
            .iter()
            .filter(|(addr, server)| {
                **addr != address && server.server_type == ServerType::RsPrimary
            })
            .map(|(addr, _)| addr.clone())
            .collect();
        for addr in other_primaries {
            self.servers
                .insert(addr.clone(), ServerDescription::new(&addr));
        }

        // The primary's member list is authoritative: union in new members and drop the
        // ones it no longer knows.
        let known_hosts: HashSet<ServerAddress> =
            server_description.known_hosts()?.into_iter().collect();
        for host in known_hosts.iter() {
            if !self.servers.contains_key(host) {
                self.servers
                    .insert(host.clone(), ServerDescription::new(host));
            }
        }
        self.servers.retain(|addr, _| known_hosts.contains(addr));

        self.check_if_has_primary();
        Ok(())
    }

    /// Updates the topology from a non-primary member's reply while no primary is known.
    fn update_rs_without_primary(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        let address = server_description.address.clone();

        if self.set_name.is_none() {
            self.set_name = server_description.set_name()?;
        } else if self.set_name != server_description.set_name()? {
            self.servers.remove(&address);
            return Ok(());
        }

        // Members learned from a non-primary are unioned in but never removed; only the
        // primary's list is authoritative.
        for host in server_description.known_hosts()? {
            if !self.servers.contains_key(&host) {
                self.servers
                    .insert(host.clone(), ServerDescription::new(&host));
            }
        }

        if server_description.invalid_me()? {
            self.servers.remove(&address);
        }

        Ok(())
    }

    /// Updates the topology from a non-primary member's reply while a primary is known.
    fn update_rs_with_primary_from_member(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        let address = server_description.address.clone();

        if self.set_name != server_description.set_name()? || server_description.invalid_me()? {
            self.servers.remove(&address);
        }

        self.check_if_has_primary();
        Ok(())
    }

    fn check_if_has_primary(&mut self) {
        if self
            .servers
            .values()
            .any(|server| server.server_type == ServerType::RsPrimary)
        {
            self.topology_type = TopologyType::ReplicaSetWithPrimary;
        } else {
            self.topology_type = TopologyType::ReplicaSetNoPrimary;
        }
    }

    pub(crate) fn has_available_servers(&self) -> bool {
        self.servers.values().any(|server| server.is_available())
    }
}

impl fmt::Display for TopologyDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        write!(f, "{{ Type: {}", self.topology_type)?;

        if let Some(ref set_name) = self.set_name {
            write!(f, ", Set Name: {}", set_name)?;
        }

        if let Some(ref compatibility_error) = self.compatibility_error {
            write!(f, ", Compatibility Error: {}", compatibility_error)?;
        }

        if !self.servers.is_empty() {
            write!(f, ", Servers: [ ")?;
            let mut iter = self.servers.values();
            if let Some(server) = iter.next() {
                write!(f, "{}: {}", server.address, server.server_type)?;
            }
            for server in iter {
                write!(f, ", {}: {}", server.address, server.server_type)?;
            }
            write!(f, " ]")?;
        }

        write!(f, " }}")
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::{
        bson::ObjectId,
        doc,
        hello::{HelloCommandResponse, HelloReply},
        options::ClientOptions,
    };

    fn address(s: &str) -> ServerAddress {
        ServerAddress::parse(s).unwrap()
    }

    fn reply_from(addr: &str, response: HelloCommandResponse) -> ServerDescription {
        ServerDescription::new_from_hello_reply(
            &address(addr),
            HelloReply {
                server_address: address(addr),
                command_response: response,
                raw_command_response: doc! {},
            },
            Duration::from_millis(10),
        )
    }

    fn rs_member(addr: &str, primary: bool, hosts: &[&str]) -> ServerDescription {
        reply_from(
            addr,
            HelloCommandResponse {
                is_master: Some(primary),
                secondary: Some(!primary),
                set_name: Some("rs0".to_string()),
                hosts: Some(hosts.iter().map(|h| h.to_string()).collect()),
                max_wire_version: Some(8),
                ..Default::default()
            },
        )
    }

    fn seeded(seeds: &[&str]) -> TopologyDescription {
        let mut description = TopologyDescription::default();
        description.initialize(
            &ClientOptions::builder()
                .hosts(seeds.iter().map(|s| address(s)).collect::<Vec<_>>())
                .build(),
        );
        description
    }

    #[test]
    fn single_seed_standalone() {
        let mut description = seeded(&["a:27017"]);
        assert_eq!(description.topology_type(), TopologyType::Unknown);

        let standalone = reply_from(
            "a:27017",
            HelloCommandResponse {
                is_master: Some(true),
                max_wire_version: Some(8),
                ..Default::default()
            },
        );
        description.update(standalone).unwrap();
        assert_eq!(description.topology_type(), TopologyType::Single);
    }

    #[test]
    fn standalone_among_multiple_seeds_is_removed() {
        let mut description = seeded(&["a:27017", "b:27017"]);
        let standalone = reply_from(
            "a:27017",
            HelloCommandResponse {
                is_master: Some(true),
                max_wire_version: Some(8),
                ..Default::default()
            },
        );
        description.update(standalone).unwrap();
        assert_eq!(description.topology_type(), TopologyType::Unknown);
        assert!(!description.servers.contains_key(&address("a:27017")));
    }

    #[test]
    fn primary_discovers_and_prunes_members() {
        let mut description = seeded(&["a:27017", "stale:27017"]);

        let new_hosts = description
            .update(rs_member("a:27017", true, &["a:27017", "b:27017", "c:27017"]))
            .unwrap();

        assert_eq!(
            description.topology_type(),
            TopologyType::ReplicaSetWithPrimary
        );
        assert_eq!(description.set_name.as_deref(), Some("rs0"));
        // New members are scheduled for monitoring; the seed absent from the primary's
        // list is dropped.
        let mut new_hosts: Vec<String> = new_hosts.iter().map(|a| a.to_string()).collect();
        new_hosts.sort();
        assert_eq!(new_hosts, vec!["b:27017", "c:27017"]);
        assert!(!description.servers.contains_key(&address("stale:27017")));
        assert_eq!(description.servers.len(), 3);
    }

    #[test]
    fn secondary_without_primary_keeps_topology_no_primary() {
        let mut description = seeded(&["a:27017"]);
        description
            .update(rs_member("a:27017", false, &["a:27017", "b:27017"]))
            .unwrap();
        assert_eq!(
            description.topology_type(),
            TopologyType::ReplicaSetNoPrimary
        );
        // Members learned from a secondary are added but nothing is pruned.
        assert!(description.servers.contains_key(&address("b:27017")));
    }

    #[test]
    fn stale_primary_is_rejected() {
        let mut description = seeded(&["a:27017", "b:27017"]);

        let mut new_primary = HelloCommandResponse {
            is_master: Some(true),
            set_name: Some("rs0".to_string()),
            hosts: Some(vec!["a:27017".to_string(), "b:27017".to_string()]),
            set_version: Some(2),
            election_id: Some(ObjectId::parse_str("aaaaaaaaaaaaaaaaaaaaaaaa").unwrap()),
            max_wire_version: Some(8),
            ..Default::default()
        };
        description
            .update(reply_from("a:27017", new_primary.clone()))
            .unwrap();
        assert_eq!(
            description.topology_type(),
            TopologyType::ReplicaSetWithPrimary
        );

        // An older (setVersion, electionId) from another node must not displace the
        // current primary.
        new_primary.set_version = Some(1);
        description
            .update(reply_from("b:27017", new_primary))
            .unwrap();

        let stale = description.get_server_description(&address("b:27017")).unwrap();
        assert_eq!(stale.server_type, ServerType::Unknown);
        let a = description.get_server_description(&address("a:27017")).unwrap();
        assert_eq!(a.server_type, ServerType::RsPrimary);
    }

    #[test]
    fn new_primary_invalidates_old_one() {
        let mut description = seeded(&["a:27017", "b:27017"]);
        description
            .update(rs_member("a:27017", true, &["a:27017", "b:27017"]))
            .unwrap();
        description
            .update(rs_member("b:27017", true, &["a:27017", "b:27017"]))
            .unwrap();

        let old = description.get_server_description(&address("a:27017")).unwrap();
        assert_eq!(old.server_type, ServerType::Unknown);
        assert_eq!(
            description.topology_type(),
            TopologyType::ReplicaSetWithPrimary
        );
    }

    #[test]
    fn network_error_marks_unknown_and_drops_primary_status() {
        let mut description = seeded(&["a:27017"]);
        description
            .update(rs_member("a:27017", true, &["a:27017"]))
            .unwrap();

        description.mark_server_unknown(
            &address("a:27017"),
            crate::error::Error::network_timeout(),
        );
        assert_eq!(
            description.topology_type(),
            TopologyType::ReplicaSetNoPrimary
        );
        assert!(!description.has_available_servers());
    }

    #[test]
    fn mongos_reply_moves_unknown_to_sharded() {
        let mut description = seeded(&["a:27017"]);
        description
            .update(reply_from(
                "a:27017",
                HelloCommandResponse {
                    msg: Some("isdbgrid".to_string()),
                    max_wire_version: Some(8),
                    ..Default::default()
                },
            ))
            .unwrap();
        assert_eq!(description.topology_type(), TopologyType::Sharded);
    }
}
