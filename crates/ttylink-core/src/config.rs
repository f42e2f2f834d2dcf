//! Configuration resolution for ttylink.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (`--config`, or `~/.config/ttylink/config.json` when present)
//! 3. Environment variables (`TTYLINK_*`)
//! 4. CLI arguments (highest priority, applied by the binary)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Default TCP listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:1234";

/// Default serial device.
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyS1";

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Complete ttylink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// TCP listen address (`host:port`).
    pub listen: String,
    pub serial: SerialConfig,
    /// Log every forwarded chunk.
    pub verbose: bool,
    pub short_write: ShortWritePolicy,
    /// Accept a new client after each session instead of exiting.
    pub keep_serving: bool,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            serial: SerialConfig::default(),
            verbose: true,
            short_write: ShortWritePolicy::Lenient,
            keep_serving: false,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Serial line configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_SERIAL_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

/// Character size on the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(Error::Config(format!(
                "invalid data bits {other} (expected 7 or 8)"
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl FromStr for DataBits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let n: u8 = s
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid data bits '{s}' (expected 7 or 8)")))?;
        Self::try_from(n)
    }
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Number of stop bits.
///
/// `OnePointFive` is accepted as input; whether the port driver can honour it
/// is decided when the port is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OnePointFive,
    #[serde(rename = "2")]
    Two,
}

impl FromStr for StopBits {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1" => Ok(Self::One),
            "1.5" => Ok(Self::OnePointFive),
            "2" => Ok(Self::Two),
            other => Err(Error::Config(format!(
                "invalid stop bits '{other}' (expected 1, 1.5 or 2)"
            ))),
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::One => "1",
            Self::OnePointFive => "1.5",
            Self::Two => "2",
        })
    }
}

/// Parity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "odd" => Ok(Self::Odd),
            "even" => Ok(Self::Even),
            "mark" => Ok(Self::Mark),
            "space" => Ok(Self::Space),
            _ => Err(Error::Config(format!(
                "invalid parity '{s}' (expected None, Odd, Even, Mark or Space)"
            ))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::Odd => "Odd",
            Self::Even => "Even",
            Self::Mark => "Mark",
            Self::Space => "Space",
        })
    }
}

/// What a relay direction does when the destination accepts fewer bytes
/// than were read from the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShortWritePolicy {
    /// Log the data loss and keep relaying.
    #[default]
    Lenient,
    /// Treat the short write as fatal for the session.
    Strict,
}

impl FromStr for ShortWritePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            _ => Err(Error::Config(format!(
                "invalid short-write policy '{s}' (expected lenient or strict)"
            ))),
        }
    }
}

impl fmt::Display for ShortWritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lenient => "lenient",
            Self::Strict => "strict",
        })
    }
}

impl BridgeConfig {
    /// Check values that serde and `FromStr` cannot reject on their own.
    pub fn validate(&self) -> Result<()> {
        if self.listen.trim().is_empty() {
            return Err(Error::Config("listen address must not be empty".into()));
        }
        if self.serial.device.trim().is_empty() {
            return Err(Error::Config("serial device must not be empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(Error::Config("baud rate must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; otherwise the global config file is read
/// only when present. Environment overrides are applied last.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => BridgeConfig::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ttylink").join("config.json"))
}

fn load_config_file(path: &Path) -> Result<BridgeConfig> {
    debug!(path = %path.display(), "Loading config file");
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `TTYLINK_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut BridgeConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("TTYLINK_LISTEN") {
        config.listen = val;
    }
    if let Some(val) = lookup("TTYLINK_SERIAL") {
        config.serial.device = val;
    }
    if let Some(val) = lookup("TTYLINK_BAUD_RATE") {
        config.serial.baud_rate = val
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid TTYLINK_BAUD_RATE '{val}'")))?;
    }
    if let Some(val) = lookup("TTYLINK_DATA_BITS") {
        config.serial.data_bits = val.parse()?;
    }
    if let Some(val) = lookup("TTYLINK_STOP_BITS") {
        config.serial.stop_bits = val.parse()?;
    }
    if let Some(val) = lookup("TTYLINK_PARITY") {
        config.serial.parity = val.parse()?;
    }
    if let Some(val) = lookup("TTYLINK_VERBOSE") {
        config.verbose = parse_bool("TTYLINK_VERBOSE", &val)?;
    }
    if let Some(val) = lookup("TTYLINK_SHORT_WRITE") {
        config.short_write = val.parse()?;
    }
    if let Some(val) = lookup("TTYLINK_KEEP_SERVING") {
        config.keep_serving = parse_bool("TTYLINK_KEEP_SERVING", &val)?;
    }
    if let Some(val) = lookup("TTYLINK_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(val) = lookup("TTYLINK_LOG_JSON") {
        config.log_json = parse_bool("TTYLINK_LOG_JSON", &val)?;
    }
    Ok(())
}

fn parse_bool(key: &str, val: &str) -> Result<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("invalid boolean for {key}: '{val}'"))),
    }
}
