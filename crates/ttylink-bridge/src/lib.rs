//! ttylink Bridge Library
//!
//! Relays one TCP client to one serial device:
//! - Duplex endpoints tagged by transport kind
//! - Endpoint acquisition (accept with retry, serial open)
//! - Per-direction relay engine with error classification
//! - Session coordination with shared cancellation

pub mod acquire;
pub mod bridge;
pub mod endpoint;
pub mod relay;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use bridge::serve;
pub use endpoint::{Endpoint, EndpointKind};
pub use relay::{RelayError, RelayOptions, RelayStats, relay};
pub use session::{Direction, SessionOutcome, run_session};
