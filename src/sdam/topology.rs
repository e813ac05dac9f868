use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
    time::Instant,
};

use tokio::sync::{watch, Notify};
use tracing::debug;

use super::{
    description::{
        server::ServerDescription,
        topology::{server_selection, TopologyDescription},
    },
    monitor::Monitor,
    server::Server,
    DEFAULT_SERVER_SELECTION_TIMEOUT,
};
use crate::{
    client::options::{ClientOptions, ServerAddress},
    error::{Error, ErrorKind, Result},
    selection_criteria::SelectionCriteria,
};

/// The driver-side view of the deployment: the monitored description plus the live
/// [`Server`] handles operations check connections out of.
///
/// The description is owned here and published to readers as immutable snapshots through a
/// watch channel; the mutex around the state is held only long enough to apply an update
/// and clone the result, never across I/O.
#[derive(Clone, Debug)]
pub(crate) struct Topology {
    inner: Arc<TopologyInner>,
}

#[derive(Debug)]
struct TopologyInner {
    state: Mutex<TopologyState>,
    publisher: watch::Sender<Arc<TopologyDescription>>,
    check_requester: Arc<Notify>,
    options: ClientOptions,
}

#[derive(Debug)]
struct TopologyState {
    description: TopologyDescription,
    servers: HashMap<ServerAddress, Arc<Server>>,
}

impl Topology {
    /// Creates the topology from the seed list and starts a monitor task per seed.
    pub(crate) fn new(options: ClientOptions) -> Result<Self> {
        let mut description = TopologyDescription::default();
        description.initialize(&options);

        let servers = description
            .server_addresses()
            .map(|address| (address.clone(), Server::new(address.clone())))
            .collect::<HashMap<_, _>>();

        let (publisher, _) = watch::channel(Arc::new(description.clone()));

        let topology = Self {
            inner: Arc::new(TopologyInner {
                state: Mutex::new(TopologyState {
                    description,
                    servers,
                }),
                publisher,
                check_requester: Arc::new(Notify::new()),
                options,
            }),
        };

        for address in topology.inner.state.lock().unwrap().servers.keys() {
            topology.start_monitor(address.clone());
        }

        Ok(topology)
    }

    fn start_monitor(&self, address: ServerAddress) {
        Monitor::start(
            address,
            self.downgrade(),
            self.inner.check_requester.clone(),
            self.inner.options.heartbeat_freq,
            self.inner.options.connect_timeout,
        );
    }

    pub(crate) fn downgrade(&self) -> WeakTopology {
        WeakTopology {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The latest published snapshot of the topology description.
    pub(crate) fn description(&self) -> Arc<TopologyDescription> {
        self.inner.publisher.borrow().clone()
    }

    pub(crate) fn contains_server(&self, address: &ServerAddress) -> bool {
        self.inner
            .state
            .lock()
            .unwrap()
            .description
            .servers
            .contains_key(address)
    }

    pub(crate) fn get_server(&self, address: &ServerAddress) -> Option<Arc<Server>> {
        self.inner.state.lock().unwrap().servers.get(address).cloned()
    }

    /// Applies a fresh server description from a monitor, spawning monitors for any newly
    /// discovered members and dropping handles for removed ones.
    pub(crate) fn update(&self, server_description: ServerDescription) {
        let new_addresses = {
            let mut state = self.inner.state.lock().unwrap();

            let new_addresses = match state.description.update(server_description) {
                Ok(new_addresses) => new_addresses,
                Err(e) => {
                    debug!(error = %e, "rejected topology update");
                    return;
                }
            };

            for address in &new_addresses {
                state
                    .servers
                    .insert(address.clone(), Server::new(address.clone()));
            }
            let description = &state.description;
            let removed: Vec<ServerAddress> = state
                .servers
                .keys()
                .filter(|addr| !description.servers.contains_key(*addr))
                .cloned()
                .collect();
            for addr in removed {
                state.servers.remove(&addr);
            }

            self.publish(&state);
            new_addresses
        };

        for address in new_addresses {
            self.start_monitor(address);
        }
    }

    /// Replaces a server's description with an unknown one after an application error.
    pub(crate) fn mark_server_unknown(&self, address: &ServerAddress, error: Error) {
        let mut state = self.inner.state.lock().unwrap();
        state.description.mark_server_unknown(address, error);
        self.publish(&state);
    }

    /// Processes the outcome of an application operation on `address`: network errors and
    /// "not master"/"node is recovering" replies mark the server unknown and request an
    /// immediate monitor sweep. The server's broken connection is left in place for its
    /// owner to re-establish on the next checkout.
    pub(crate) fn handle_application_error(&self, address: &ServerAddress, error: &Error) {
        if error.is_network_error() || error.is_state_change_error() {
            self.mark_server_unknown(address, error.clone());
            self.request_check();
        }
    }

    /// Wakes every monitor for an early check.
    pub(crate) fn request_check(&self) {
        self.inner.check_requester.notify_waiters();
    }

    fn publish(&self, state: &TopologyState) {
        let snapshot = Arc::new(state.description.clone());
        // Send unconditionally; receivers compare descriptions themselves.
        let _ = self.inner.publisher.send(snapshot);
    }

    /// Selects a server matching `criteria`, retrying as topology updates arrive until the
    /// server selection timeout elapses.
    pub(crate) async fn select_server(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<Arc<Server>> {
        let timeout = self
            .inner
            .options
            .server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT);
        let deadline = Instant::now() + timeout;
        let mut watcher = self.inner.publisher.subscribe();

        loop {
            let (description, selected) = {
                let state = self.inner.state.lock().unwrap();
                let selected = server_selection::attempt_to_select_server(
                    criteria,
                    &state.description,
                    &state.servers,
                )?;
                (Arc::new(state.description.clone()), selected)
            };

            if let Some(server) = selected {
                return Ok(server);
            }

            // Nothing suitable yet: ask the monitors to hurry and wait for the topology
            // to change, giving up at the deadline.
            self.request_check();

            let now = Instant::now();
            if now >= deadline {
                return Err(ErrorKind::ServerSelectionTimeout {
                    message: description.server_selection_timeout_error_message(criteria),
                }
                .into());
            }

            let _ = tokio::time::timeout(deadline - now, watcher.changed()).await;
        }
    }

    /// A monitor-less topology pinned to a single standalone server, for tests that drive
    /// operations against a mock connection.
    #[cfg(test)]
    pub(crate) fn new_mocked(options: ClientOptions, address: ServerAddress) -> Self {
        use std::time::Duration;

        use crate::{
            doc,
            hello::{HelloCommandResponse, HelloReply},
        };

        let mut description = TopologyDescription::default();
        description.initialize(&options);
        description.topology_type = super::TopologyType::Single;

        let reply = HelloReply {
            server_address: address.clone(),
            command_response: HelloCommandResponse::parse(&doc! {
                "ismaster": true,
                "maxWireVersion": 8,
                "ok": 1,
            }),
            raw_command_response: doc! {},
        };
        description.servers.insert(
            address.clone(),
            ServerDescription::new_from_hello_reply(&address, reply, Duration::from_millis(1)),
        );

        let servers = [(address.clone(), Server::new(address))]
            .into_iter()
            .collect::<HashMap<_, _>>();

        let (publisher, _) = watch::channel(Arc::new(description.clone()));

        Self {
            inner: Arc::new(TopologyInner {
                state: Mutex::new(TopologyState {
                    description,
                    servers,
                }),
                publisher,
                check_requester: Arc::new(Notify::new()),
                options,
            }),
        }
    }

    /// Selects a server without waiting. Cursors use this for getMore/killCursors, where
    /// the target server either is still known or the cursor is dead anyway.
    pub(crate) fn try_select_server(&self, criteria: &SelectionCriteria) -> Result<Arc<Server>> {
        let state = self.inner.state.lock().unwrap();
        let selected = server_selection::attempt_to_select_server(
            criteria,
            &state.description,
            &state.servers,
        )?;
        selected.ok_or_else(|| {
            ErrorKind::NoSuitableServer {
                message: format!(
                    "No suitable server in topology for criteria {:?}. Topology: {}",
                    criteria, state.description
                ),
            }
            .into()
        })
    }
}

/// A handle to the topology that does not keep it alive. Monitors hold these so a dropped
/// client shuts its monitors down.
#[derive(Clone, Debug)]
pub(crate) struct WeakTopology {
    inner: Weak<TopologyInner>,
}

impl WeakTopology {
    pub(crate) fn upgrade(&self) -> Option<Topology> {
        Some(Topology {
            inner: self.inner.upgrade()?,
        })
    }

    #[cfg(test)]
    pub(crate) fn new_disconnected() -> Self {
        Self { inner: Weak::new() }
    }
}

#[allow(unused)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<Topology>();
}
