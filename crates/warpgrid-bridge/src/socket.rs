//! Deadline-aware duplex socket over a host socket object.
//!
//! Every read and write captures the deadline in force when it starts, runs
//! the blocking host operation on the task pool and races it against that
//! deadline and the socket's close signal. An operation that loses the race
//! returns at once; the pool task keeps running and its result is dropped,
//! except for reads, where the next read picks the in-flight result up so no
//! data is lost.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::{Buf, Bytes};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use warpgrid_host_api::{HostFunction, HostValue, Object, ReadableStream, WritableStream};

use crate::context::RuntimeContext;
use crate::deferred;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::BridgeHandle;
use crate::stream::HostStreamReader;

/// How the host should secure the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecureTransport {
    #[default]
    Off,
    On,
    /// Plain at first; upgrade later with [`Socket::start_tls`].
    StartTls,
}

impl SecureTransport {
    fn as_str(self) -> &'static str {
        match self {
            SecureTransport::Off => "off",
            SecureTransport::On => "on",
            SecureTransport::StartTls => "starttls",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketOptions {
    pub secure_transport: SecureTransport,
    pub allow_half_open: bool,
}

impl SocketOptions {
    fn to_host(self) -> HostValue {
        Object::new()
            .with("secureTransport", self.secure_transport.as_str())
            .with("allowHalfOpen", self.allow_half_open)
            .into()
    }
}

/// Open a socket through the runtime context's `connect` function.
///
/// A synchronous throw from `connect` becomes an error. The bridge's
/// configured socket timeout, if any, becomes both deadlines.
pub fn connect(ctx: &RuntimeContext, address: &str, options: SocketOptions) -> BridgeResult<Socket> {
    let connect = ctx
        .value("connect")
        .and_then(HostValue::as_function)
        .cloned()
        .ok_or_else(|| BridgeError::decode("connect is not available in this runtime context"))?;
    let bridge = ctx.bridge();
    let args = vec![HostValue::from(address), options.to_host()];
    let raw = bridge
        .host()
        .call(move || connect.call(args))
        .ok_or(BridgeError::Abandoned)??;

    let socket = Socket::from_host(&raw, bridge)?;
    if let Some(timeout) = bridge.socket_timeout() {
        socket.set_deadline(Some(Instant::now() + timeout));
    }
    debug!(%address, secure_transport = options.secure_transport.as_str(), "socket connected");
    Ok(socket)
}

#[derive(Debug, Clone, Copy, Default)]
struct Deadlines {
    read: Option<Instant>,
    write: Option<Instant>,
}

#[derive(Default)]
struct ReadState {
    leftover: Bytes,
    in_flight: Option<JoinHandle<BridgeResult<Option<Bytes>>>>,
}

/// A host duplex socket used through blocking [`Read`] and [`Write`].
///
/// Reads and writes take `&self`, so one thread may read while another
/// writes. Two concurrent readers (or writers) are not supported.
pub struct Socket {
    raw: HostValue,
    reader: Arc<Mutex<HostStreamReader>>,
    readable: ReadableStream,
    writable: WritableStream,
    close_fn: HostFunction,
    secure: bool,
    deadlines: Mutex<Deadlines>,
    read_state: Mutex<ReadState>,
    closed: watch::Sender<bool>,
    bridge: BridgeHandle,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Socket {
    /// Wrap a host socket object (`readable`, `writable`, `close`).
    pub fn from_host(raw: &HostValue, bridge: &BridgeHandle) -> BridgeResult<Self> {
        let readable = raw
            .get("readable")
            .as_stream()
            .cloned()
            .ok_or_else(|| BridgeError::decode("socket.readable must be a ReadableStream"))?;
        let writable = raw
            .get("writable")
            .as_writable()
            .cloned()
            .ok_or_else(|| BridgeError::decode("socket.writable must be a WritableStream"))?;
        let close_fn = raw
            .get("close")
            .as_function()
            .cloned()
            .ok_or_else(|| BridgeError::decode("socket.close must be a function"))?;
        let (closed, _) = watch::channel(false);
        Ok(Self {
            raw: raw.clone(),
            reader: Arc::new(Mutex::new(HostStreamReader::new(readable.clone()))),
            readable,
            writable,
            close_fn,
            secure: raw.get("secure").as_bool().unwrap_or(false),
            deadlines: Mutex::new(Deadlines::default()),
            read_state: Mutex::new(ReadState::default()),
            closed,
            bridge: bridge.clone(),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Set both deadlines. Only operations started afterwards see it.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        let mut deadlines = lock(&self.deadlines);
        deadlines.read = deadline;
        deadlines.write = deadline;
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        lock(&self.deadlines).read = deadline;
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        lock(&self.deadlines).write = deadline;
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        lock(&self.deadlines).read
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        lock(&self.deadlines).write
    }

    /// Read into `buf`; `Ok(0)` at end of stream.
    pub fn read(&self, buf: &mut [u8]) -> BridgeResult<usize> {
        let deadline = self.read_deadline();
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = lock(&self.read_state);
        if state.leftover.is_empty() {
            let mut task = match state.in_flight.take() {
                Some(task) => task,
                None => {
                    let reader = self.reader.clone();
                    self.bridge
                        .spawner()
                        .spawn_blocking(move || lock(&reader).read_chunk())
                }
            };
            match self.race(deadline, &mut task) {
                Ok(joined) => match joined? {
                    Some(chunk) => state.leftover = chunk,
                    None => return Ok(0),
                },
                Err(err) => {
                    if matches!(err, BridgeError::DeadlineExceeded) {
                        state.in_flight = Some(task);
                    }
                    return Err(err);
                }
            }
        }

        let n = buf.len().min(state.leftover.len());
        buf[..n].copy_from_slice(&state.leftover[..n]);
        state.leftover.advance(n);
        Ok(n)
    }

    /// Write all of `buf`; returns once the host has accepted it.
    pub fn write(&self, buf: &[u8]) -> BridgeResult<usize> {
        let deadline = self.write_deadline();
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }
        let writable = self.writable.clone();
        let chunk = Bytes::copy_from_slice(buf);
        let mut task = self
            .bridge
            .spawner()
            .spawn_blocking(move || deferred::wait(&writable.write(chunk)).map(drop));
        self.race(deadline, &mut task)??;
        Ok(buf.len())
    }

    /// Wait for `task`, giving up at `deadline` or when the socket closes.
    fn race<T: Send + 'static>(
        &self,
        deadline: Option<Instant>,
        task: &mut JoinHandle<BridgeResult<T>>,
    ) -> BridgeResult<BridgeResult<T>> {
        let mut closed = self.closed.subscribe();
        self.bridge.spawner().block_on(async move {
            tokio::select! {
                joined = task => joined.map_err(|e| BridgeError::Io(io::Error::other(e))),
                _ = expiry(deadline) => Err(BridgeError::DeadlineExceeded),
                _ = closed.wait_for(|closed| *closed) => Err(BridgeError::Closed),
            }
        })
    }

    /// Close the connection. Unblocks in-flight reads and writes.
    pub fn close(&self) -> BridgeResult<()> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        let close_fn = self.close_fn.clone();
        let result = self
            .bridge
            .host()
            .call(move || close_fn.call(Vec::new()))
            .ok_or(BridgeError::Abandoned)??;
        if let Some(done) = result.as_promise() {
            deferred::wait(done)?;
        }
        debug!("socket closed");
        Ok(())
    }

    /// Stop reading; the host may still accept writes.
    pub fn close_read(&self) -> BridgeResult<()> {
        match deferred::wait(&self.readable.cancel()) {
            Ok(_) => Ok(()),
            Err(BridgeError::Host(err)) if err.is_invalid_state() => {
                debug!("socket readable already finished");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Finish writing; reads keep working when the host allows half-open.
    pub fn close_write(&self) -> BridgeResult<()> {
        if self.writable.is_closed() {
            return Ok(());
        }
        deferred::wait(&self.writable.close()).map(drop)
    }

    /// Upgrade to TLS.
    ///
    /// The host hands back a new socket object; the returned [`Socket`]
    /// wraps it, inherits this socket's deadlines and gets its own close
    /// signal. This socket must not be used afterwards.
    pub fn start_tls(self) -> BridgeResult<Socket> {
        let start_tls = self
            .raw
            .get("startTls")
            .as_function()
            .cloned()
            .ok_or_else(|| BridgeError::decode("socket does not support startTls"))?;
        let raw = self
            .bridge
            .host()
            .call(move || start_tls.call(Vec::new()))
            .ok_or(BridgeError::Abandoned)??;

        let upgraded = Socket::from_host(&raw, &self.bridge)?;
        *lock(&upgraded.deadlines) = *lock(&self.deadlines);
        if !lock(&self.read_state).leftover.is_empty() {
            warn!("discarding unread plaintext at TLS upgrade");
        }
        debug!(secure = upgraded.secure, "socket upgraded");
        Ok(upgraded)
    }
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Socket::read(self, buf).map_err(io::Error::from)
    }
}

impl Read for &Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Socket::read(self, buf).map_err(io::Error::from)
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Socket::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Socket::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("secure", &self.secure)
            .field("closed", &self.is_closed())
            .field("deadlines", &*lock(&self.deadlines))
            .finish()
    }
}
