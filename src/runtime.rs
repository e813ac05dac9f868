//! Thin wrappers over the async runtime.

mod stream;

use std::{future::Future, time::Duration};

pub(crate) use self::stream::AsyncStream;

use crate::error::{Error, Result};

/// Spawns a background task if a runtime is available. Used for fire-and-forget work such
/// as cursor cleanup; outside of a runtime context the work is silently skipped.
pub(crate) fn spawn<F>(fut: F)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(fut);
    }
}

/// Awaits `future`, bounding it by `duration` when one is given. The default for all I/O in
/// this crate is no timeout.
pub(crate) async fn timeout<F: Future>(duration: Option<Duration>, future: F) -> Result<F::Output> {
    match duration {
        Some(duration) => tokio::time::timeout(duration, future)
            .await
            .map_err(|_| Error::network_timeout()),
        None => Ok(future.await),
    }
}
