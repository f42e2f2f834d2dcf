//! Session coordinator: runs both relay directions for one client.
//!
//! Both directions share one cancellation scope. The first direction to hit
//! a fatal error cancels the scope, which unblocks the other direction's
//! pending read or write; both endpoints are then closed.

use std::fmt;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::endpoint::Endpoint;
use crate::relay::{RelayDirection, RelayError, RelayOptions, RelayStats};

/// One of the two relay directions of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    NetworkToSerial,
    SerialToNetwork,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NetworkToSerial => "tcp->serial",
            Self::SerialToNetwork => "serial->tcp",
        })
    }
}

/// The fatal error that ended a session.
#[derive(Debug)]
pub struct DirectionFailure {
    pub direction: Direction,
    pub error: RelayError,
}

/// How a session ended.
#[derive(Debug, Default)]
pub struct SessionOutcome {
    /// First fatal error, or `None` when the session was cancelled from outside.
    pub failure: Option<DirectionFailure>,
    pub network_to_serial: RelayStats,
    pub serial_to_network: RelayStats,
}

impl SessionOutcome {
    pub const fn stats(&self, direction: Direction) -> RelayStats {
        match direction {
            Direction::NetworkToSerial => self.network_to_serial,
            Direction::SerialToNetwork => self.serial_to_network,
        }
    }

    fn record(&mut self, finished: FinishedDirection) {
        match finished.direction {
            Direction::NetworkToSerial => self.network_to_serial = finished.stats,
            Direction::SerialToNetwork => self.serial_to_network = finished.stats,
        }
        if let Err(error) = finished.result {
            if self.failure.is_none() {
                self.failure = Some(DirectionFailure {
                    direction: finished.direction,
                    error,
                });
            } else {
                debug!(direction = %finished.direction, error = %error, "Relay direction failed during teardown");
            }
        }
    }
}

struct FinishedDirection {
    direction: Direction,
    stats: RelayStats,
    result: Result<(), RelayError>,
}

/// Relay between `network` and `serial` until either side fails or
/// `shutdown` is cancelled. Both endpoints are closed before returning.
pub async fn run_session(
    network: Endpoint,
    serial: Endpoint,
    options: RelayOptions,
    shutdown: &CancellationToken,
) -> SessionOutcome {
    info!(peer = network.peer(), device = serial.peer(), "Session started");

    let scope = shutdown.child_token();
    let (network_rx, network_tx) = network.split();
    let (serial_rx, serial_tx) = serial.split();

    let mut tasks = JoinSet::new();
    tasks.spawn(run_direction(
        Direction::NetworkToSerial,
        RelayDirection::new(network_rx, serial_tx),
        options,
        scope.clone(),
    ));
    tasks.spawn(run_direction(
        Direction::SerialToNetwork,
        RelayDirection::new(serial_rx, network_tx),
        options,
        scope.clone(),
    ));

    let mut outcome = SessionOutcome::default();
    while let Some(joined) = tasks.join_next().await {
        scope.cancel();
        match joined {
            Ok(finished) => {
                if let Err(e) = &finished.result {
                    if outcome.failure.is_none() {
                        warn!(direction = %finished.direction, error = %e, "Relay direction failed, closing session");
                    }
                }
                outcome.record(finished);
            }
            Err(e) => error!(error = %e, "Relay task aborted"),
        }
    }

    info!(
        tcp_to_serial_bytes = outcome.network_to_serial.bytes_written,
        serial_to_tcp_bytes = outcome.serial_to_network.bytes_written,
        short_writes = outcome.network_to_serial.short_writes + outcome.serial_to_network.short_writes,
        failed = outcome.failure.is_some(),
        "Session closed"
    );
    outcome
}

async fn run_direction(
    direction: Direction,
    mut relay: RelayDirection,
    options: RelayOptions,
    cancel: CancellationToken,
) -> FinishedDirection {
    debug!(direction = %direction, "Relay direction started");
    let result = relay.run(&options, &cancel).await;
    let stats = relay.stats();

    // Closing the destination here lets the peer see EOF even while the
    // other direction still holds the matching read half.
    let (_source, mut destination) = relay.into_parts();
    match tokio::time::timeout(options.write_deadline, destination.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(direction = %direction, error = %e, "Failed to close destination"),
        Err(_) => debug!(direction = %direction, "Timed out closing destination"),
    }

    FinishedDirection {
        direction,
        stats,
        result,
    }
}
