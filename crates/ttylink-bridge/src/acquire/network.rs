//! Network endpoint acquisition: bind once, accept one client at a time.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::AcquisitionError;
use crate::endpoint::Endpoint;

/// Delay policy between retries of temporarily failing accepts.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    /// Delay after the first temporary failure.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied to delay after each failed attempt.
    pub multiplier: f64,
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl AcceptBackoff {
    /// Calculate the delay for a given attempt number (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

/// Accept errors worth retrying on the same listener.
///
/// Covers aborted handshakes and resource exhaustion (descriptor or buffer
/// limits), which clear up without re-binding.
pub fn is_temporary_accept_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    ) {
        return true;
    }
    #[cfg(unix)]
    {
        if let Some(code) = err.raw_os_error() {
            return matches!(code, libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM);
        }
    }
    false
}

/// Bind the listening socket.
pub async fn bind_listener(addr: &str) -> Result<TcpListener, AcquisitionError> {
    let listener = TcpListener::bind(addr).await.map_err(|source| {
        error!(addr, error = %source, "listen error");
        AcquisitionError::Bind {
            addr: addr.to_string(),
            source,
        }
    })?;
    match listener.local_addr() {
        Ok(local) => info!(addr = %local, "Listening for a client"),
        Err(_) => info!(addr, "Listening for a client"),
    }
    Ok(listener)
}

/// Run `accept` until it yields a connection, retrying temporary failures.
///
/// Any other failure ends acquisition. `cancel` aborts a pending accept or a
/// backoff wait.
pub async fn accept_with<S, F, Fut>(
    mut accept: F,
    backoff: &AcceptBackoff,
    cancel: &CancellationToken,
) -> Result<(S, SocketAddr), AcquisitionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(S, SocketAddr)>>,
{
    let mut attempt: u32 = 0;
    loop {
        let accepted = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AcquisitionError::Cancelled),
            accepted = accept() => accepted,
        };

        match accepted {
            Ok(conn) => return Ok(conn),
            Err(e) if is_temporary_accept_error(&e) => {
                let delay = backoff.delay_for_attempt(attempt);
                debug!(error = %e, attempt, delay_ms = delay.as_millis(), "Temporary accept error, retrying");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(AcquisitionError::Cancelled),
                    () = sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
            Err(e) => {
                error!(error = %e, "accept error");
                return Err(AcquisitionError::Accept(e));
            }
        }
    }
}

/// Accept one client on an already bound listener.
pub async fn accept_endpoint(
    listener: &TcpListener,
    backoff: &AcceptBackoff,
    cancel: &CancellationToken,
) -> Result<Endpoint, AcquisitionError> {
    let (stream, peer) = accept_with(move || listener.accept(), backoff, cancel).await?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, peer = %peer, "Failed to set TCP_NODELAY");
    }
    info!(peer = %peer, "{peer} connected");
    Ok(Endpoint::network(peer.to_string(), stream))
}

/// Bind on `addr` and block until one client connects.
pub async fn acquire_network_endpoint(
    addr: &str,
    cancel: &CancellationToken,
) -> Result<Endpoint, AcquisitionError> {
    let listener = bind_listener(addr).await?;
    accept_endpoint(&listener, &AcceptBackoff::default(), cancel).await
}
