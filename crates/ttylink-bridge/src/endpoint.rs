//! Duplex endpoints relayed by a session.
//!
//! An [`Endpoint`] wraps any `AsyncRead + AsyncWrite` transport together with
//! a kind tag fixed at construction. The relay engine consults the tag for
//! log labels, write deadlines and zero-read semantics instead of inspecting
//! the transport type.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Byte stream usable as an endpoint transport.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

type BoxedTransport = Box<dyn Transport>;

/// Which side of the bridge an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Network,
    Serial,
}

impl EndpointKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Network => "tcp",
            Self::Serial => "serial",
        }
    }

    /// Writes to this endpoint are bounded by the relay's write deadline.
    pub const fn supports_write_deadline(self) -> bool {
        matches!(self, Self::Network)
    }

    /// A read returning zero bytes means the peer has gone away.
    ///
    /// True for sockets. A serial line is never closed by an empty read.
    pub const fn zero_read_is_eof(self) -> bool {
        matches!(self, Self::Network)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A ready duplex endpoint owned by one session.
pub struct Endpoint {
    kind: EndpointKind,
    peer: String,
    read_timeout: Option<Duration>,
    stream: BoxedTransport,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Wrap an accepted network connection. `peer` is the remote address.
    pub fn network<T: Transport + 'static>(peer: impl Into<String>, stream: T) -> Self {
        Self {
            kind: EndpointKind::Network,
            peer: peer.into(),
            read_timeout: None,
            stream: Box::new(stream),
        }
    }

    /// Wrap an opened serial device. `device` is the device path.
    pub fn serial<T: Transport + 'static>(
        device: impl Into<String>,
        stream: T,
        read_timeout: Duration,
    ) -> Self {
        Self {
            kind: EndpointKind::Serial,
            peer: device.into(),
            read_timeout: Some(read_timeout),
            stream: Box::new(stream),
        }
    }

    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Remote address for network endpoints, device path for serial ones.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub const fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Split into independently owned read and write halves.
    ///
    /// The transport is closed once both halves are dropped.
    pub fn split(self) -> (EndpointReader, EndpointWriter) {
        let (reader, writer) = tokio::io::split(self.stream);
        (
            EndpointReader {
                kind: self.kind,
                read_timeout: self.read_timeout,
                inner: reader,
            },
            EndpointWriter {
                kind: self.kind,
                inner: writer,
            },
        )
    }

    /// Shut the transport down and release it.
    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

/// Read half of an [`Endpoint`].
pub struct EndpointReader {
    kind: EndpointKind,
    read_timeout: Option<Duration>,
    inner: ReadHalf<BoxedTransport>,
}

impl EndpointReader {
    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Read into `buf`.
    ///
    /// When the endpoint has a read timeout, a read that sees no data within
    /// it fails with [`io::ErrorKind::TimedOut`].
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.read(buf))
                .await
                .unwrap_or_else(|_| {
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data within {}ms", limit.as_millis()),
                    ))
                }),
            None => self.inner.read(buf).await,
        }
    }
}

/// Write half of an [`Endpoint`].
pub struct EndpointWriter {
    kind: EndpointKind,
    inner: WriteHalf<BoxedTransport>,
}

impl EndpointWriter {
    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    /// Shut down the write side of the transport.
    pub async fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}
