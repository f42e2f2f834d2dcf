//! Scripted transport for exercising relay edge cases.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// One scripted result for `poll_read`.
pub enum ReadStep {
    Data(&'static [u8]),
    /// `Ok` with nothing read.
    Zero,
    Fail(io::ErrorKind),
}

/// Transport that replays scripted reads and records writes.
///
/// Once the read script is exhausted reads stay pending forever.
pub struct ScriptedStream {
    reads: VecDeque<ReadStep>,
    written: Arc<Mutex<Vec<u8>>>,
    write_budget: Option<usize>,
    write_error: Option<io::ErrorKind>,
}

impl ScriptedStream {
    pub fn reading(steps: impl IntoIterator<Item = ReadStep>) -> Self {
        Self {
            reads: steps.into_iter().collect(),
            written: Arc::new(Mutex::new(Vec::new())),
            write_budget: None,
            write_error: None,
        }
    }

    /// Accept only `budget` bytes in total, then report zero-length writes.
    pub fn with_write_budget(mut self, budget: usize) -> Self {
        self.write_budget = Some(budget);
        self
    }

    /// Fail every write with `kind`.
    pub fn with_write_error(mut self, kind: io::ErrorKind) -> Self {
        self.write_error = Some(kind);
        self
    }

    /// Handle to the bytes written so far.
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.reads.pop_front() {
            Some(ReadStep::Data(data)) => {
                buf.put_slice(data);
                Poll::Ready(Ok(()))
            }
            Some(ReadStep::Zero) => Poll::Ready(Ok(())),
            Some(ReadStep::Fail(kind)) => Poll::Ready(Err(io::Error::from(kind))),
            None => Poll::Pending,
        }
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(kind) = self.write_error {
            return Poll::Ready(Err(io::Error::from(kind)));
        }
        let n = self.write_budget.map_or(buf.len(), |b| b.min(buf.len()));
        if let Some(budget) = self.write_budget.as_mut() {
            *budget -= n;
        }
        self.written.lock().unwrap().extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
