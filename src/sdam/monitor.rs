use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Notify;
use tracing::{debug, warn};

use super::{
    description::server::ServerDescription,
    topology::WeakTopology,
    DEFAULT_HEARTBEAT_FREQUENCY,
};
use crate::{
    client::options::ServerAddress,
    cmap::Connection,
    error::Result,
    hello::{hello_command, run_hello, HelloReply},
    runtime,
};

/// The weight of the newest sample in the round-trip-time moving average.
const RTT_SMOOTHING_FACTOR: f64 = 0.2;

/// The floor between consecutive checks of the same server, even when one is requested
/// early.
const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);

/// A monitor of a single server: periodically runs the handshake command over a dedicated
/// connection and feeds the resulting description into the topology.
pub(crate) struct Monitor {
    address: ServerAddress,
    connection: Option<Connection>,
    topology: WeakTopology,
    check_requester: Arc<Notify>,
    hello_ok: Option<bool>,
    average_round_trip_time: Option<Duration>,
    heartbeat_freq: Duration,
    connect_timeout: Option<Duration>,
}

impl Monitor {
    /// Starts a monitor task for the given address. The task exits when the topology is
    /// dropped or the server is removed from it.
    pub(crate) fn start(
        address: ServerAddress,
        topology: WeakTopology,
        check_requester: Arc<Notify>,
        heartbeat_freq: Option<Duration>,
        connect_timeout: Option<Duration>,
    ) {
        let monitor = Monitor {
            address,
            connection: None,
            topology,
            check_requester,
            hello_ok: None,
            average_round_trip_time: None,
            heartbeat_freq: heartbeat_freq.unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY),
            connect_timeout,
        };
        runtime::spawn(monitor.execute());
    }

    async fn execute(mut self) {
        loop {
            let description = self.check_server().await;

            match self.topology.upgrade() {
                Some(topology) => {
                    if !topology.contains_server(&self.address) {
                        debug!(address = %self.address, "server removed from topology, stopping monitor");
                        break;
                    }
                    topology.update(description);
                }
                None => break,
            }

            // Wait out the heartbeat period, but wake early when a check is requested
            // (e.g. after an application operation saw a "not master" reply). Back-to-back
            // checks are floored at the minimum frequency.
            let requested = tokio::select! {
                _ = tokio::time::sleep(self.heartbeat_freq) => false,
                _ = self.check_requester.notified() => true,
            };
            if requested {
                tokio::time::sleep(MIN_HEARTBEAT_FREQUENCY).await;
            }
        }
    }

    /// Runs a single check, producing the server description to publish.
    async fn check_server(&mut self) -> ServerDescription {
        match self.perform_hello().await {
            Ok(reply) => ServerDescription::new_from_hello_reply(
                &self.address,
                reply,
                self.average_round_trip_time
                    .expect("rtt is recorded by a successful hello"),
            ),
            Err(first_error) => {
                // The cached monitoring connection may simply have gone stale; one
                // immediate retry on a fresh connection distinguishes that from a down
                // server.
                self.connection = None;
                match self.perform_hello().await {
                    Ok(reply) => ServerDescription::new_from_hello_reply(
                        &self.address,
                        reply,
                        self.average_round_trip_time
                            .expect("rtt is recorded by a successful hello"),
                    ),
                    Err(retry_error) => {
                        warn!(
                            address = %self.address,
                            error = %retry_error,
                            "server heartbeat failed"
                        );
                        let _ = first_error;
                        self.average_round_trip_time = None;
                        ServerDescription::new_from_error(&self.address, retry_error)
                    }
                }
            }
        }
    }

    async fn perform_hello(&mut self) -> Result<HelloReply> {
        let start = Instant::now();

        if self.connection.is_none() {
            let connection =
                Connection::connect(0, self.address.clone(), self.connect_timeout, None).await?;
            self.connection = Some(connection);
        }
        let connection = self.connection.as_mut().expect("connection was just set");

        let command = hello_command(self.hello_ok, None, None);
        let reply = run_hello(connection, command).await;

        match reply {
            Ok(reply) => {
                self.hello_ok = Some(reply.command_response.hello_ok.unwrap_or(false));
                self.record_round_trip_time(start.elapsed());
                debug!(
                    address = %self.address,
                    rtt = ?self.average_round_trip_time,
                    "server heartbeat succeeded"
                );
                Ok(reply)
            }
            Err(e) => {
                self.connection = None;
                Err(e)
            }
        }
    }

    /// Folds a new sample into the RTT estimate with an exponential moving average.
    fn record_round_trip_time(&mut self, sample: Duration) {
        self.average_round_trip_time = Some(match self.average_round_trip_time {
            Some(old) => {
                let new = RTT_SMOOTHING_FACTOR * sample.as_secs_f64()
                    + (1.0 - RTT_SMOOTHING_FACTOR) * old.as_secs_f64();
                Duration::from_secs_f64(new)
            }
            None => sample,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rtt_moving_average_uses_alpha_point_two() {
        let mut monitor = Monitor {
            address: ServerAddress::default(),
            connection: None,
            topology: WeakTopology::new_disconnected(),
            check_requester: Arc::new(Notify::new()),
            hello_ok: None,
            average_round_trip_time: None,
            heartbeat_freq: DEFAULT_HEARTBEAT_FREQUENCY,
            connect_timeout: None,
        };

        monitor.record_round_trip_time(Duration::from_millis(100));
        assert_eq!(monitor.average_round_trip_time, Some(Duration::from_millis(100)));

        monitor.record_round_trip_time(Duration::from_millis(200));
        // 0.2 * 200 + 0.8 * 100 = 120
        let avg = monitor.average_round_trip_time.unwrap();
        assert!((avg.as_secs_f64() - 0.120).abs() < 1e-9);
    }
}
