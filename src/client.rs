pub(crate) mod auth;
mod executor;
pub mod options;

use std::sync::Arc;

use crate::{
    cmap::establish::ConnectionEstablisher,
    concern::WriteConcern,
    db::Database,
    error::Result,
    options::ClientOptions,
    sdam::Topology,
    selection_criteria::SelectionCriteria,
};

/// A handle to a MongoDB deployment.
///
/// `Client` uses [`std::sync::Arc`] internally, so it can be shared or cloned across tasks
/// and threads freely. It monitors the topology in the background tasks it spawns; dropping
/// the last clone shuts those down.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    topology: Topology,
    options: ClientOptions,
    establisher: ConnectionEstablisher,
}

impl Client {
    /// Creates a new `Client` connected to the deployment specified by `options`. Topology
    /// monitoring begins immediately.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let establisher = ConnectionEstablisher::new(&options);
        let topology = Topology::new(options.clone())?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                topology,
                options,
                establisher,
            }),
        })
    }

    /// Gets a handle to the database with the provided name.
    ///
    /// This does not send or receive anything across the wire; the database does not have
    /// to exist yet.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name)
    }

    /// Gets a handle to the default database of the parsed options, if one was specified.
    pub fn default_database(&self) -> Option<Database> {
        self.inner
            .options
            .default_database
            .as_deref()
            .map(|name| self.database(name))
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    pub(crate) fn establisher(&self) -> &ConnectionEstablisher {
        &self.inner.establisher
    }

    /// The selection criteria read operations fall back to when neither the operation nor
    /// its collection specifies one.
    pub(crate) fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.inner.options.selection_criteria.as_ref()
    }

    /// The write concern write operations fall back to.
    pub(crate) fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.options.write_concern.as_ref()
    }

    /// A client whose single server is backed by a pre-established connection, for driving
    /// the full operation path against an in-memory mock server.
    #[cfg(test)]
    pub(crate) async fn mocked(connection: crate::cmap::Connection) -> Self {
        use crate::client::options::ServerAddress;

        let address = connection.address.clone();
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::default()])
            .build();
        let establisher = ConnectionEstablisher::new(&options);
        let topology = Topology::new_mocked(options.clone(), address.clone());
        let server = topology.get_server(&address).expect("mock server exists");
        *server.connection.lock().await = Some(connection);
        Self {
            inner: Arc::new(ClientInner {
                topology,
                options,
                establisher,
            }),
        }
    }
}
