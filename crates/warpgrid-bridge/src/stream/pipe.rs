//! In-process blocking pipe.
//!
//! Lets one task produce a body incrementally while another (usually a
//! [`ReaderSource`](super::ReaderSource) feeding the host) consumes it.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, Bytes};
use tokio::sync::mpsc;

/// Chunks buffered between writer and reader before `write` blocks.
const PIPE_CAPACITY: usize = 16;

/// Create a connected reader/writer pair.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let (tx, rx) = mpsc::channel(PIPE_CAPACITY);
    let closed = Arc::new(AtomicBool::new(false));
    (
        PipeReader {
            rx: Some(rx),
            buffer: Bytes::new(),
            closer: PipeCloser {
                closed: closed.clone(),
                wake: tx.downgrade(),
            },
        },
        PipeWriter {
            tx: Some(tx),
            closed,
        },
    )
}

/// Reading half of a [`pipe`]. Reads return end of data once the writer is
/// dropped or closed and everything written has been read.
#[derive(Debug)]
pub struct PipeReader {
    rx: Option<mpsc::Receiver<Bytes>>,
    buffer: Bytes,
    closer: PipeCloser,
}

/// Writing half of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    closed: Arc<AtomicBool>,
}

/// Closes the reading half of a [`pipe`] from any thread, including while
/// another thread is blocked reading it.
#[derive(Debug, Clone)]
pub struct PipeCloser {
    closed: Arc<AtomicBool>,
    wake: mpsc::WeakSender<Bytes>,
}

impl PipeCloser {
    /// Mark the pipe closed for reading. A blocked read wakes with
    /// `BrokenPipe`, and so does the writer's next write.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // An empty chunk wakes a reader parked on an idle channel. A full
        // channel means no reader is parked.
        if let Some(tx) = self.wake.upgrade() {
            let _ = tx.try_send(Bytes::new());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "io: read/write on closed pipe")
}

impl PipeReader {
    /// Close the reading half. Pending and later writes fail with
    /// `BrokenPipe`, and so do later reads.
    pub fn close(&mut self) {
        self.closer.close();
        self.rx = None;
        self.buffer = Bytes::new();
    }

    /// A handle that closes this reader without access to it.
    pub fn closer(&self) -> PipeCloser {
        self.closer.clone()
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.buffer.is_empty() {
            if self.closer.is_closed() {
                self.rx = None;
                return Err(closed_pipe());
            }
            let rx = self.rx.as_mut().ok_or_else(closed_pipe)?;
            match rx.blocking_recv() {
                Some(chunk) => self.buffer = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.buffer.len());
        buf[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        Ok(n)
    }
}

impl PipeWriter {
    /// Signal end of data to the reader.
    pub fn close(&mut self) {
        self.tx = None;
    }

    fn reader_closed(&mut self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.tx = None;
        }
        self.tx.is_none()
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.reader_closed() {
            return Err(closed_pipe());
        }
        let tx = self.tx.as_ref().ok_or_else(closed_pipe)?;
        if buf.is_empty() {
            return Ok(0);
        }
        tx.blocking_send(Bytes::copy_from_slice(buf))
            .map_err(|_| closed_pipe())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
