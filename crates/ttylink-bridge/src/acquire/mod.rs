//! Endpoint acquisition.
//!
//! Produces one ready [`Endpoint`](crate::endpoint::Endpoint) of each kind:
//! an accepted TCP connection and an opened serial port.

pub mod network;
pub mod serial;

pub use network::{AcceptBackoff, accept_endpoint, acquire_network_endpoint, bind_listener};
pub use serial::{SERIAL_READ_TIMEOUT, acquire_serial_endpoint};

/// Errors that prevent a session from starting.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("listen error on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("accept error: {0}")]
    Accept(#[source] std::io::Error),

    #[error("serial open error for {device}: {source}")]
    SerialOpen {
        device: String,
        source: tokio_serial::Error,
    },

    #[error("unsupported serial setting: {0}")]
    Unsupported(String),

    #[error("acquisition cancelled")]
    Cancelled,
}
