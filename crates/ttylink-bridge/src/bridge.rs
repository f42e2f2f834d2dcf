//! Top-level serving loop: acquire endpoints, run sessions.

use tokio_util::sync::CancellationToken;
use tracing::info;

use ttylink_core::BridgeConfig;

use crate::acquire::{
    AcceptBackoff, AcquisitionError, accept_endpoint, acquire_serial_endpoint, bind_listener,
};
use crate::relay::RelayOptions;
use crate::session::run_session;

/// Acquire the serial device and the listener, then relay sessions.
///
/// The serial port is opened before the listener is bound, so a bad device
/// aborts startup before any client can connect. Runs a single session
/// unless `keep_serving` is set, in which case the serial port is reopened
/// and the next client accepted after each session. Cancelling `shutdown`
/// ends the current session or pending accept and returns `Ok`.
pub async fn serve(
    config: &BridgeConfig,
    shutdown: &CancellationToken,
) -> Result<(), AcquisitionError> {
    let options = RelayOptions::from_config(config);
    let backoff = AcceptBackoff::default();

    let mut serial = acquire_serial_endpoint(&config.serial)?;
    let listener = bind_listener(&config.listen).await?;

    loop {
        let network = match accept_endpoint(&listener, &backoff, shutdown).await {
            Ok(endpoint) => endpoint,
            Err(AcquisitionError::Cancelled) => {
                info!("Shutdown requested while waiting for a client");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let outcome = run_session(network, serial, options, shutdown).await;
        if let Some(failure) = &outcome.failure {
            info!(direction = %failure.direction, reason = %failure.error, "Session ended");
        }

        if !config.keep_serving || shutdown.is_cancelled() {
            return Ok(());
        }
        serial = acquire_serial_endpoint(&config.serial)?;
    }
}
