use std::{collections::HashMap, sync::Arc, time::Duration};

use rand::seq::IndexedRandom;

use super::TopologyDescription;
use crate::{
    client::options::ServerAddress,
    error::{ErrorKind, Result},
    sdam::{
        description::{
            server::{ServerDescription, ServerType},
            topology::TopologyType,
        },
        Server,
        ServerInfo,
    },
    selection_criteria::{ReadPreference, SelectionCriteria, TagSet},
};

const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

/// Attempt to select a server, returning `None` if no server matched the provided criteria.
///
/// The final choice among the servers inside the latency window is uniformly random; a
/// deterministic pick (such as always the first) would herd every client onto the same
/// member.
pub(crate) fn attempt_to_select_server(
    criteria: &SelectionCriteria,
    topology_description: &TopologyDescription,
    servers: &HashMap<ServerAddress, Arc<Server>>,
) -> Result<Option<Arc<Server>>> {
    let in_window = topology_description.suitable_servers_in_latency_window(criteria)?;
    let in_window_servers: Vec<_> = in_window
        .into_iter()
        .flat_map(|desc| servers.get(&desc.address))
        .collect();
    let selected = in_window_servers.choose(&mut rand::rng());
    Ok(selected.map(|server| (*server).clone()))
}

impl TopologyDescription {
    pub(crate) fn server_selection_timeout_error_message(
        &self,
        criteria: &SelectionCriteria,
    ) -> String {
        if self.has_available_servers() {
            format!(
                "Server selection timeout: None of the available servers suitable for \
                 criteria {:?}. Topology: {}",
                criteria, self
            )
        } else {
            format!(
                "Server selection timeout: No available servers. Topology: {}",
                self
            )
        }
    }

    /// The set of servers matching `criteria` whose average RTT is within the local
    /// threshold of the fastest matching server.
    pub(crate) fn suitable_servers_in_latency_window<'a>(
        &'a self,
        criteria: &'a SelectionCriteria,
    ) -> Result<Vec<&'a ServerDescription>> {
        if let Some(message) = self.compatibility_error() {
            return Err(ErrorKind::NoSuitableServer {
                message: message.to_string(),
            }
            .into());
        }

        // An unknown topology has no servers to offer yet; the caller retries as the
        // monitors learn more.
        if self.topology_type == TopologyType::Unknown {
            return Ok(Vec::new());
        }

        let mut suitable_servers = match criteria {
            SelectionCriteria::ReadPreference(ref read_pref) => self.suitable_servers(read_pref)?,
            SelectionCriteria::Predicate(ref filter) => self
                .servers
                .values()
                .filter(|s| {
                    // A direct connection ignores whether the single server is data-bearing.
                    (self.topology_type == TopologyType::Single || s.server_type.is_data_bearing())
                        && filter(&ServerInfo::new_borrowed(s))
                })
                .collect(),
        };

        self.retain_servers_within_latency_window(&mut suitable_servers);

        Ok(suitable_servers)
    }

    fn suitable_servers(
        &self,
        read_preference: &ReadPreference,
    ) -> Result<Vec<&ServerDescription>> {
        let servers = match self.topology_type {
            TopologyType::Unknown => Vec::new(),
            TopologyType::Single => self.servers.values().collect(),
            TopologyType::Sharded => self.servers_with_type(&[ServerType::Mongos]).collect(),
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
                self.suitable_servers_in_replica_set(read_preference)?
            }
        };

        Ok(servers)
    }

    fn retain_servers_within_latency_window(
        &self,
        suitable_servers: &mut Vec<&ServerDescription>,
    ) {
        let shortest_average_rtt = suitable_servers
            .iter()
            .filter_map(|server_desc| server_desc.average_round_trip_time)
            .fold(Option::<Duration>::None, |min, curr| match min {
                Some(prev) => Some(prev.min(curr)),
                None => Some(curr),
            });

        let local_threshold = self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD);

        let max_rtt_within_window =
            shortest_average_rtt.map(|rtt| rtt.checked_add(local_threshold).unwrap_or(Duration::MAX));

        suitable_servers.retain(move |server_desc| {
            match (server_desc.average_round_trip_time, max_rtt_within_window) {
                (Some(server_rtt), Some(max_rtt)) => server_rtt <= max_rtt,
                _ => false,
            }
        });
    }

    pub(crate) fn servers_with_type<'a>(
        &'a self,
        types: &'a [ServerType],
    ) -> impl Iterator<Item = &'a ServerDescription> {
        self.servers
            .values()
            .filter(move |server| types.contains(&server.server_type))
    }

    fn suitable_servers_in_replica_set(
        &self,
        read_preference: &ReadPreference,
    ) -> Result<Vec<&ServerDescription>> {
        let tag_sets = read_preference.tag_sets();
        let max_staleness = read_preference.max_staleness();

        let servers = match read_preference {
            ReadPreference::Primary => self.servers_with_type(&[ServerType::RsPrimary]).collect(),
            ReadPreference::Secondary { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsSecondary],
                tag_sets,
                max_staleness,
            )?,
            ReadPreference::PrimaryPreferred { .. } => {
                match self.servers_with_type(&[ServerType::RsPrimary]).next() {
                    Some(primary) => vec![primary],
                    None => self.suitable_servers_for_read_preference(
                        &[ServerType::RsSecondary],
                        tag_sets,
                        max_staleness,
                    )?,
                }
            }
            ReadPreference::SecondaryPreferred { .. } => {
                let suitable_servers = self.suitable_servers_for_read_preference(
                    &[ServerType::RsSecondary],
                    tag_sets,
                    max_staleness,
                )?;

                if suitable_servers.is_empty() {
                    self.servers_with_type(&[ServerType::RsPrimary]).collect()
                } else {
                    suitable_servers
                }
            }
            ReadPreference::Nearest { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsPrimary, ServerType::RsSecondary],
                tag_sets,
                max_staleness,
            )?,
        };

        Ok(servers)
    }

    fn suitable_servers_for_read_preference(
        &self,
        types: &'static [ServerType],
        tag_sets: Option<&Vec<TagSet>>,
        max_staleness: Option<Duration>,
    ) -> Result<Vec<&ServerDescription>> {
        let mut servers = self.servers_with_type(types).collect();

        // Per the max staleness spec, a bound of zero or less means no bound.
        if let Some(max_staleness) = max_staleness {
            if max_staleness > Duration::from_secs(0) {
                self.filter_servers_by_max_staleness(&mut servers, max_staleness);
            }
        }

        if let Some(tag_sets) = tag_sets {
            filter_servers_by_tag_sets(&mut servers, tag_sets);
        }

        Ok(servers)
    }

    fn filter_servers_by_max_staleness(
        &self,
        servers: &mut Vec<&ServerDescription>,
        max_staleness: Duration,
    ) {
        let primary = self
            .servers
            .values()
            .find(|server| server.server_type == ServerType::RsPrimary);

        match primary {
            Some(primary) => {
                self.filter_servers_by_max_staleness_with_primary(servers, primary, max_staleness)
            }
            None => self.filter_servers_by_max_staleness_without_primary(servers, max_staleness),
        };
    }

    fn filter_servers_by_max_staleness_with_primary(
        &self,
        servers: &mut Vec<&ServerDescription>,
        primary: &ServerDescription,
        max_staleness: Duration,
    ) {
        let max_staleness_ms: i64 = max_staleness.as_millis().try_into().unwrap_or(i64::MAX);

        servers.retain(|server| {
            let server_staleness =
                self.calculate_secondary_staleness_with_primary(server, primary);

            server_staleness
                .map(|staleness| staleness <= max_staleness_ms)
                .unwrap_or(false)
        })
    }

    fn filter_servers_by_max_staleness_without_primary(
        &self,
        servers: &mut Vec<&ServerDescription>,
        max_staleness: Duration,
    ) {
        let max_staleness: i64 = max_staleness.as_millis().try_into().unwrap_or(i64::MAX);
        let max_write_date = self
            .servers
            .values()
            .filter(|server| server.server_type == ServerType::RsSecondary)
            .filter_map(|server| server.last_write_date().ok().flatten())
            .map(|last_write_date| last_write_date.timestamp_millis())
            .max();

        let secondary_max_write_date = match max_write_date {
            Some(max_write_date) => max_write_date,
            None => return,
        };

        servers.retain(|server| {
            let server_staleness = self
                .calculate_secondary_staleness_without_primary(server, secondary_max_write_date);

            server_staleness
                .map(|staleness| staleness <= max_staleness)
                .unwrap_or(false)
        })
    }

    fn calculate_secondary_staleness_with_primary(
        &self,
        secondary: &ServerDescription,
        primary: &ServerDescription,
    ) -> Option<i64> {
        let primary_last_update = primary.last_update_time?.timestamp_millis();
        let primary_last_write = primary.last_write_date().ok()??.timestamp_millis();

        let secondary_last_update = secondary.last_update_time?.timestamp_millis();
        let secondary_last_write = secondary.last_write_date().ok()??.timestamp_millis();

        let heartbeat_frequency: i64 = self
            .heartbeat_frequency()
            .as_millis()
            .try_into()
            .unwrap_or(i64::MAX);

        let staleness = (secondary_last_update - secondary_last_write)
            - (primary_last_update - primary_last_write)
            + heartbeat_frequency;

        Some(staleness)
    }

    fn calculate_secondary_staleness_without_primary(
        &self,
        secondary: &ServerDescription,
        max_last_write_date: i64,
    ) -> Option<i64> {
        let secondary_last_write = secondary.last_write_date().ok()??.timestamp_millis();
        let heartbeat_frequency: i64 = self
            .heartbeat_frequency()
            .as_millis()
            .try_into()
            .unwrap_or(i64::MAX);

        let staleness = max_last_write_date - secondary_last_write + heartbeat_frequency;
        Some(staleness)
    }
}

/// Filters by the first tag set that matches at least one server; an empty list of tag sets
/// matches everything, and no matching tag set matches nothing.
fn filter_servers_by_tag_sets(servers: &mut Vec<&ServerDescription>, tag_sets: &[TagSet]) {
    if tag_sets.is_empty() {
        return;
    }

    for tag_set in tag_sets {
        let matches_tag_set = |server: &&ServerDescription| server.matches_tag_set(tag_set);

        if servers.iter().any(matches_tag_set) {
            servers.retain(matches_tag_set);

            return;
        }
    }

    servers.clear();
}

#[cfg(test)]
mod test {
    use std::{collections::HashSet, time::Duration};

    use super::*;
    use crate::{
        client::options::ClientOptions,
        doc,
        hello::{HelloCommandResponse, HelloReply, LastWrite},
        bson::DateTime,
    };

    fn address(s: &str) -> ServerAddress {
        ServerAddress::parse(s).unwrap()
    }

    fn rs_node(
        addr: &str,
        primary: bool,
        rtt: Duration,
        tags: Option<Vec<(&str, &str)>>,
        last_write_millis: Option<i64>,
    ) -> ServerDescription {
        let response = HelloCommandResponse {
            is_master: Some(primary),
            secondary: Some(!primary),
            set_name: Some("rs0".to_string()),
            hosts: Some(vec![]),
            max_wire_version: Some(8),
            tags: tags.map(|pairs| {
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            }),
            last_write: last_write_millis.map(|millis| LastWrite {
                last_write_date: DateTime::from_millis(millis),
            }),
            ..Default::default()
        };
        ServerDescription::new_from_hello_reply(
            &address(addr),
            HelloReply {
                server_address: address(addr),
                command_response: response,
                raw_command_response: doc! {},
            },
            rtt,
        )
    }

    fn topology(descriptions: Vec<ServerDescription>) -> TopologyDescription {
        let mut description = TopologyDescription::default();
        description.initialize(
            &ClientOptions::builder()
                .hosts(
                    descriptions
                        .iter()
                        .map(|d| d.address.clone())
                        .collect::<Vec<_>>(),
                )
                .build(),
        );
        description.topology_type = if descriptions
            .iter()
            .any(|d| d.server_type == ServerType::RsPrimary)
        {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
        for d in descriptions {
            description.servers.insert(d.address.clone(), d);
        }
        description
    }

    fn selected_addresses(
        description: &TopologyDescription,
        criteria: &SelectionCriteria,
    ) -> Vec<String> {
        let mut addresses: Vec<String> = description
            .suitable_servers_in_latency_window(criteria)
            .unwrap()
            .into_iter()
            .map(|d| d.address.to_string())
            .collect();
        addresses.sort();
        addresses
    }

    #[test]
    fn primary_mode_selects_only_the_primary() {
        let description = topology(vec![
            rs_node("a:1", true, Duration::from_millis(10), None, None),
            rs_node("b:1", false, Duration::from_millis(10), None, None),
        ]);
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);
        assert_eq!(selected_addresses(&description, &criteria), vec!["a:1"]);
    }

    #[test]
    fn secondary_mode_fails_over_to_nothing() {
        let description = topology(vec![rs_node(
            "a:1",
            true,
            Duration::from_millis(10),
            None,
            None,
        )]);
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Secondary {
            tag_sets: None,
            max_staleness: None,
        });
        assert!(selected_addresses(&description, &criteria).is_empty());
    }

    #[test]
    fn secondary_preferred_falls_back_to_primary() {
        let description = topology(vec![rs_node(
            "a:1",
            true,
            Duration::from_millis(10),
            None,
            None,
        )]);
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::SecondaryPreferred {
            tag_sets: None,
            max_staleness: None,
        });
        assert_eq!(selected_addresses(&description, &criteria), vec!["a:1"]);
    }

    #[test]
    fn nearest_includes_primary_and_secondaries_within_window() {
        let description = topology(vec![
            rs_node("a:1", true, Duration::from_millis(10), None, None),
            rs_node("b:1", false, Duration::from_millis(12), None, None),
            // Outside the 15ms window above the 10ms minimum.
            rs_node("c:1", false, Duration::from_millis(40), None, None),
        ]);
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Nearest {
            tag_sets: None,
            max_staleness: None,
        });
        assert_eq!(
            selected_addresses(&description, &criteria),
            vec!["a:1", "b:1"]
        );
    }

    #[test]
    fn first_matching_tag_set_wins() {
        let description = topology(vec![
            rs_node("a:1", true, Duration::from_millis(10), None, None),
            rs_node(
                "b:1",
                false,
                Duration::from_millis(10),
                Some(vec![("dc", "east")]),
                None,
            ),
            rs_node(
                "c:1",
                false,
                Duration::from_millis(10),
                Some(vec![("dc", "west")]),
                None,
            ),
        ]);
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Secondary {
            tag_sets: Some(vec![
                [("dc".to_string(), "north".to_string())].into_iter().collect(),
                [("dc".to_string(), "west".to_string())].into_iter().collect(),
            ]),
            max_staleness: None,
        });
        assert_eq!(selected_addresses(&description, &criteria), vec!["c:1"]);
    }

    #[test]
    fn max_staleness_drops_lagging_secondaries() {
        let now = DateTime::now().timestamp_millis();
        let description = topology(vec![
            rs_node("a:1", true, Duration::from_millis(10), None, Some(now)),
            rs_node("fresh:1", false, Duration::from_millis(10), None, Some(now)),
            rs_node(
                "stale:1",
                false,
                Duration::from_millis(10),
                None,
                // Two minutes behind the primary.
                Some(now - 120_000),
            ),
        ]);
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Secondary {
            tag_sets: None,
            max_staleness: Some(Duration::from_secs(90)),
        });
        assert_eq!(selected_addresses(&description, &criteria), vec!["fresh:1"]);
    }

    #[test]
    fn unknown_topology_yields_no_servers() {
        let mut description = TopologyDescription::default();
        description.initialize(
            &ClientOptions::builder()
                .hosts(vec![address("a:1")])
                .build(),
        );
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);
        assert!(description
            .suitable_servers_in_latency_window(&criteria)
            .unwrap()
            .is_empty());
    }

    // With equal RTTs and secondary mode, repeated random selection must reach every
    // secondary; a biased pick would starve members.
    #[test]
    fn equal_rtt_selection_covers_all_secondaries() {
        let description = topology(vec![
            rs_node("a:1", true, Duration::from_millis(10), None, None),
            rs_node("b:1", false, Duration::from_millis(10), None, None),
            rs_node("c:1", false, Duration::from_millis(10), None, None),
            rs_node("d:1", false, Duration::from_millis(10), None, None),
        ]);
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Secondary {
            tag_sets: None,
            max_staleness: None,
        });

        let servers: HashMap<ServerAddress, std::sync::Arc<Server>> = description
            .servers
            .keys()
            .map(|addr| (addr.clone(), Server::new(addr.clone())))
            .collect();

        let mut seen = HashSet::new();
        for _ in 0..500 {
            let selected = attempt_to_select_server(&criteria, &description, &servers)
                .unwrap()
                .expect("selection should succeed");
            seen.insert(selected.address.to_string());
        }
        let mut seen: Vec<_> = seen.into_iter().collect();
        seen.sort();
        assert_eq!(seen, vec!["b:1", "c:1", "d:1"]);
    }
}
