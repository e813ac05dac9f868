use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use tokio::sync::Mutex;

use crate::{client::options::ServerAddress, cmap::Connection};

/// The driver-side state for a single member of the topology: its address and the cached
/// application connection to it.
///
/// A pooled front-end would keep a free-list here; this driver core keeps one application
/// connection per server, serialized by the mutex, which preserves the one-request-in-flight
/// invariant per stream.
#[derive(Debug)]
pub(crate) struct Server {
    pub(crate) address: ServerAddress,

    /// The cached application connection. `None` until first use and after a network error
    /// evicts it.
    pub(crate) connection: Mutex<Option<Connection>>,

    next_connection_id: AtomicU32,
}

impl Server {
    pub(crate) fn new(address: ServerAddress) -> Arc<Self> {
        Arc::new(Self {
            address,
            connection: Mutex::new(None),
            next_connection_id: AtomicU32::new(1),
        })
    }

    pub(crate) fn next_connection_id(&self) -> u32 {
        self.next_connection_id.fetch_add(1, Ordering::SeqCst)
    }
}
