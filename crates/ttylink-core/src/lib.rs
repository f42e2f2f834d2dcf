//! `ttylink` Core Library
//!
//! Shared functionality for `ttylink` components:
//! - Configuration model and hierarchical resolution
//! - Serial line settings (data bits, stop bits, parity)
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{BridgeConfig, DataBits, Parity, SerialConfig, ShortWritePolicy, StopBits};
pub use error::{Error, Result};
