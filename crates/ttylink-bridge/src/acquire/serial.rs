//! Serial endpoint acquisition.

use std::time::Duration;

use tokio_serial::SerialPortBuilderExt;
use tracing::{error, info, warn};

use ttylink_core::{DataBits, Parity, SerialConfig, StopBits};

use super::AcquisitionError;
use crate::endpoint::Endpoint;

/// How long a serial read may wait for data before reporting a timeout.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Translate configured line settings into driver settings.
///
/// 1.5 stop bits and mark/space parity are valid configuration but the
/// driver cannot program them; they are rejected with a warning rather than
/// replaced by a neighbouring setting.
pub fn line_settings(
    config: &SerialConfig,
) -> Result<
    (
        tokio_serial::DataBits,
        tokio_serial::StopBits,
        tokio_serial::Parity,
    ),
    AcquisitionError,
> {
    let data_bits = match config.data_bits {
        DataBits::Seven => tokio_serial::DataBits::Seven,
        DataBits::Eight => tokio_serial::DataBits::Eight,
    };

    let stop_bits = match config.stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
        StopBits::OnePointFive => {
            warn!(device = %config.device, "Serial stop bits 1.5 is not supported by the port driver");
            return Err(AcquisitionError::Unsupported(format!(
                "stop bits {} on {}",
                config.stop_bits, config.device
            )));
        }
    };

    let parity = match config.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Mark | Parity::Space => {
            warn!(device = %config.device, parity = %config.parity, "Serial parity is not supported by the port driver");
            return Err(AcquisitionError::Unsupported(format!(
                "parity {} on {}",
                config.parity, config.device
            )));
        }
    };

    Ok((data_bits, stop_bits, parity))
}

/// Open and configure the serial device named in `config`.
///
/// The endpoint reads with [`SERIAL_READ_TIMEOUT`] and treats empty reads as
/// "no data yet".
pub fn acquire_serial_endpoint(config: &SerialConfig) -> Result<Endpoint, AcquisitionError> {
    let (data_bits, stop_bits, parity) = line_settings(config)?;

    let stream = tokio_serial::new(config.device.as_str(), config.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(SERIAL_READ_TIMEOUT)
        .open_native_async()
        .map_err(|source| {
            error!(device = %config.device, error = %source, "serial OpenPort error");
            AcquisitionError::SerialOpen {
                device: config.device.clone(),
                source,
            }
        })?;

    info!(
        device = %config.device,
        baud_rate = config.baud_rate,
        data_bits = %config.data_bits,
        stop_bits = %config.stop_bits,
        parity = %config.parity,
        "Serial port is connected"
    );
    Ok(Endpoint::serial(
        config.device.clone(),
        stream,
        SERIAL_READ_TIMEOUT,
    ))
}
