//! Relay engine: copies bytes from one endpoint to another.
//!
//! One [`RelayDirection`] runs per direction of a session. It keeps reading
//! until a fatal error or until its cancellation token fires. Read timeouts
//! and empty reads on endpoints that do not treat them as EOF are transient.

use std::io;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ttylink_core::{BridgeConfig, ShortWritePolicy};

use crate::endpoint::{EndpointKind, EndpointReader, EndpointWriter};

/// Size of the per-direction transfer buffer.
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Upper bound on a single write to an endpoint that supports deadlines.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(3);

/// Pause after an empty read on a serial source so a hung-up line cannot spin.
const ZERO_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Per-direction relay behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Log every chunk read from the source.
    pub verbose: bool,
    pub short_write: ShortWritePolicy,
    pub write_deadline: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            short_write: ShortWritePolicy::Lenient,
            write_deadline: WRITE_DEADLINE,
        }
    }
}

impl RelayOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            verbose: config.verbose,
            short_write: config.short_write,
            ..Self::default()
        }
    }
}

/// Counters for one relay direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub short_writes: u64,
    /// Reads that timed out or returned nothing.
    pub idle_reads: u64,
}

/// Fatal conditions that end a relay direction.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{endpoint} recv error: {source}")]
    Read {
        endpoint: EndpointKind,
        source: io::Error,
    },

    #[error("{endpoint} write error: {source}")]
    Write {
        endpoint: EndpointKind,
        source: io::Error,
    },

    #[error("{endpoint} write did not complete within {}ms", .deadline.as_millis())]
    WriteDeadline {
        endpoint: EndpointKind,
        deadline: Duration,
    },

    #[error("{endpoint} short write: sent {written} of {expected} bytes")]
    ShortWrite {
        endpoint: EndpointKind,
        written: usize,
        expected: usize,
    },
}

/// Read errors that only mean "nothing arrived yet".
pub fn is_transient_read_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// A unidirectional association of a source and a destination endpoint.
pub struct RelayDirection {
    source: EndpointReader,
    destination: EndpointWriter,
    buf: Box<[u8; RELAY_BUFFER_SIZE]>,
    stats: RelayStats,
}

impl RelayDirection {
    pub fn new(source: EndpointReader, destination: EndpointWriter) -> Self {
        Self {
            source,
            destination,
            buf: Box::new([0u8; RELAY_BUFFER_SIZE]),
            stats: RelayStats::default(),
        }
    }

    pub const fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn into_parts(self) -> (EndpointReader, EndpointWriter) {
        (self.source, self.destination)
    }

    /// Relay until a fatal error or until `cancel` fires.
    ///
    /// Cancellation returns `Ok(())`; anything returned as `Err` means this
    /// direction cannot continue.
    pub async fn run(
        &mut self,
        options: &RelayOptions,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        let from = self.source.kind();
        let to = self.destination.kind();

        loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                read = self.source.read(&mut self.buf[..]) => read,
            };

            let n = match read {
                Ok(0) if from.zero_read_is_eof() => {
                    return Err(RelayError::Read {
                        endpoint: from,
                        source: io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by peer",
                        ),
                    });
                }
                Ok(0) => {
                    self.stats.idle_reads += 1;
                    tokio::time::sleep(ZERO_READ_BACKOFF).await;
                    continue;
                }
                Ok(n) => n,
                Err(e) if is_transient_read_error(&e) => {
                    self.stats.idle_reads += 1;
                    continue;
                }
                Err(e) => {
                    debug!(error = %e, endpoint = %from, "recv error");
                    return Err(RelayError::Read {
                        endpoint: from,
                        source: e,
                    });
                }
            };
            self.stats.bytes_read += n as u64;

            if options.verbose {
                info!(endpoint = %from, len = n, data = ?&self.buf[..n], "{from} recv");
            }

            let delivered = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                delivered = deliver(&mut self.destination, &self.buf[..n], options) => delivered?,
            };
            self.stats.bytes_written += delivered as u64;

            if delivered != n {
                self.stats.short_writes += 1;
                warn!(endpoint = %to, sent = delivered, recv = n, "io error: short write, data lost");
                if options.short_write == ShortWritePolicy::Strict {
                    return Err(RelayError::ShortWrite {
                        endpoint: to,
                        written: delivered,
                        expected: n,
                    });
                }
            }
        }
    }
}

/// Copy `source` into `destination` until a fatal error or cancellation.
pub async fn relay(
    source: EndpointReader,
    destination: EndpointWriter,
    options: &RelayOptions,
    cancel: &CancellationToken,
) -> Result<RelayStats, RelayError> {
    let mut direction = RelayDirection::new(source, destination);
    direction.run(options, cancel).await?;
    Ok(direction.stats())
}

/// Write `data`, bounded by the write deadline when the destination has one.
///
/// Returns how many bytes the destination accepted; fewer than `data.len()`
/// means the transport stopped accepting bytes.
async fn deliver(
    destination: &mut EndpointWriter,
    data: &[u8],
    options: &RelayOptions,
) -> Result<usize, RelayError> {
    let endpoint = destination.kind();
    let written = if endpoint.supports_write_deadline() {
        tokio::time::timeout(options.write_deadline, write_chunk(destination, data))
            .await
            .map_err(|_| RelayError::WriteDeadline {
                endpoint,
                deadline: options.write_deadline,
            })?
    } else {
        write_chunk(destination, data).await
    };

    written.map_err(|source| {
        debug!(error = %source, endpoint = %endpoint, "write error");
        RelayError::Write { endpoint, source }
    })
}

async fn write_chunk(destination: &mut EndpointWriter, data: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < data.len() {
        match destination.write(&data[written..]).await {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    destination.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::test_helpers::{ReadStep, ScriptedStream};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const SERIAL_TIMEOUT: Duration = Duration::from_secs(5);

    fn serial_reader(steps: Vec<ReadStep>) -> EndpointReader {
        Endpoint::serial("/dev/ttyTEST", ScriptedStream::reading(steps), SERIAL_TIMEOUT)
            .split()
            .0
    }

    fn network_reader(steps: Vec<ReadStep>) -> EndpointReader {
        Endpoint::network("127.0.0.1:40000", ScriptedStream::reading(steps))
            .split()
            .0
    }

    #[tokio::test]
    async fn forwards_bytes_in_order() {
        let source = network_reader(vec![
            ReadStep::Data(b"AT\r\n"),
            ReadStep::Data(b"ATZ\r\n"),
        ]);
        let (device, mut device_remote) = tokio::io::duplex(64);
        let (_, destination) = Endpoint::serial("/dev/ttyTEST", device, SERIAL_TIMEOUT).split();

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                relay(source, destination, &RelayOptions::default(), &cancel).await
            })
        };

        let mut buf = [0u8; 9];
        device_remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"AT\r\nATZ\r\n");

        cancel.cancel();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.bytes_read, 9);
        assert_eq!(stats.bytes_written, 9);
        assert_eq!(stats.short_writes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_serial_reads_never_end_the_direction() {
        let dest = ScriptedStream::reading([]);
        let written = dest.written();
        let (_, destination) = Endpoint::network("127.0.0.1:40000", dest).split();
        let mut direction = RelayDirection::new(
            serial_reader(vec![
                ReadStep::Zero,
                ReadStep::Zero,
                ReadStep::Data(b"x"),
                ReadStep::Fail(io::ErrorKind::BrokenPipe),
            ]),
            destination,
        );

        let err = direction
            .run(&RelayOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Read { endpoint: EndpointKind::Serial, .. }));
        assert_eq!(direction.stats().idle_reads, 2);
        assert_eq!(written.lock().unwrap().as_slice(), b"x");
    }

    #[tokio::test]
    async fn empty_network_read_is_end_of_stream() {
        let (_, destination) =
            Endpoint::serial("/dev/ttyTEST", ScriptedStream::reading([]), SERIAL_TIMEOUT).split();

        let err = relay(
            network_reader(vec![ReadStep::Zero]),
            destination,
            &RelayOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            RelayError::Read { endpoint, source } => {
                assert_eq!(endpoint, EndpointKind::Network);
                assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn timeout_errors_are_transient() {
        let dest = ScriptedStream::reading([]);
        let written = dest.written();
        let (_, destination) = Endpoint::network("127.0.0.1:40000", dest).split();
        let mut direction = RelayDirection::new(
            serial_reader(vec![
                ReadStep::Fail(io::ErrorKind::TimedOut),
                ReadStep::Fail(io::ErrorKind::WouldBlock),
                ReadStep::Fail(io::ErrorKind::Interrupted),
                ReadStep::Data(b"OK\r\n"),
                ReadStep::Fail(io::ErrorKind::ConnectionReset),
            ]),
            destination,
        );

        let err = direction
            .run(&RelayOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            RelayError::Read { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(direction.stats().idle_reads, 3);
        assert_eq!(written.lock().unwrap().as_slice(), b"OK\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_serial_line_keeps_relaying_after_timeouts() {
        let (device, mut device_remote) = tokio::io::duplex(64);
        let (source, _) = Endpoint::serial("/dev/ttyTEST", device, SERIAL_TIMEOUT).split();
        let (client, mut client_remote) = tokio::io::duplex(64);
        let (_, destination) = Endpoint::network("127.0.0.1:40000", client).split();

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut direction = RelayDirection::new(source, destination);
                let result = direction.run(&RelayOptions::default(), &cancel).await;
                (result, direction.stats())
            })
        };

        // Two full read timeouts pass with nothing on the line.
        tokio::time::sleep(Duration::from_secs(12)).await;
        device_remote.write_all(b"RING\r\n").await.unwrap();

        let mut buf = [0u8; 6];
        client_remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"RING\r\n");

        cancel.cancel();
        let (result, stats) = task.await.unwrap();
        assert!(result.is_ok());
        assert!(stats.idle_reads >= 2);
    }

    #[tokio::test]
    async fn write_error_is_fatal() {
        let dest = ScriptedStream::reading([]).with_write_error(io::ErrorKind::BrokenPipe);
        let (_, destination) = Endpoint::network("127.0.0.1:40000", dest).split();

        let err = relay(
            serial_reader(vec![ReadStep::Data(b"data")]),
            destination,
            &RelayOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            RelayError::Write { endpoint, source } => {
                assert_eq!(endpoint, EndpointKind::Network);
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn lenient_short_write_is_logged_and_relay_continues() {
        let dest = ScriptedStream::reading([]).with_write_budget(2);
        let written = dest.written();
        let (_, destination) = Endpoint::serial("/dev/ttyTEST", dest, SERIAL_TIMEOUT).split();
        let mut direction = RelayDirection::new(
            network_reader(vec![
                ReadStep::Data(b"abcd"),
                ReadStep::Data(b"ef"),
                ReadStep::Zero,
            ]),
            destination,
        );

        let err = direction
            .run(&RelayOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        // The direction only ends on the peer closing, not on the short writes.
        assert!(matches!(err, RelayError::Read { endpoint: EndpointKind::Network, .. }));
        let stats = direction.stats();
        assert_eq!(stats.short_writes, 2);
        assert_eq!(stats.bytes_read, 6);
        assert_eq!(stats.bytes_written, 2);
        assert_eq!(written.lock().unwrap().as_slice(), b"ab");
    }

    #[tokio::test]
    async fn strict_short_write_ends_the_direction() {
        let dest = ScriptedStream::reading([]).with_write_budget(2);
        let (_, destination) = Endpoint::serial("/dev/ttyTEST", dest, SERIAL_TIMEOUT).split();
        let options = RelayOptions {
            short_write: ShortWritePolicy::Strict,
            ..RelayOptions::default()
        };

        let err = relay(
            network_reader(vec![ReadStep::Data(b"abcd")]),
            destination,
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RelayError::ShortWrite {
                endpoint: EndpointKind::Serial,
                written: 2,
                expected: 4,
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_network_peer_hits_write_deadline() {
        // Nobody reads the remote end, so the second write blocks.
        let (client, _client_remote) = tokio::io::duplex(4);
        let (_, destination) = Endpoint::network("127.0.0.1:40000", client).split();

        let err = relay(
            serial_reader(vec![ReadStep::Data(b"0123456789")]),
            destination,
            &RelayOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RelayError::WriteDeadline { endpoint: EndpointKind::Network, deadline } if deadline == WRITE_DEADLINE
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn serial_destination_has_no_write_deadline() {
        let (device, _device_remote) = tokio::io::duplex(4);
        let (_, destination) = Endpoint::serial("/dev/ttyTEST", device, SERIAL_TIMEOUT).split();

        let pending = tokio::time::timeout(
            Duration::from_secs(10),
            relay(
                network_reader(vec![ReadStep::Data(b"0123456789")]),
                destination,
                &RelayOptions::default(),
                &CancellationToken::new(),
            ),
        )
        .await;

        assert!(pending.is_err(), "write to serial should still be blocked");
    }

    #[tokio::test]
    async fn cancellation_ends_a_blocked_read() {
        let (_, destination) = Endpoint::network("127.0.0.1:40000", ScriptedStream::reading([]))
            .split();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = relay(
            network_reader(vec![]),
            destination,
            &RelayOptions::default(),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(stats, RelayStats::default());
    }

    #[test]
    fn classifies_transient_read_errors() {
        assert!(is_transient_read_error(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_transient_read_error(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_transient_read_error(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_transient_read_error(&io::Error::from(io::ErrorKind::UnexpectedEof)));
    }
}
