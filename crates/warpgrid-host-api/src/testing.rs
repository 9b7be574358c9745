//! In-memory host objects for tests and local runs.
//!
//! Nothing here touches the network: sources are fed from the test,
//! sinks record what they receive, and sockets loop writes back to their
//! own readable side.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::lock;
use crate::promise::{Promise, Resolver};
use crate::stream::{ReadableStream, StreamController, UnderlyingSink, UnderlyingSource, WritableStream};
use crate::value::{HostFunction, HostValue, Object};

enum Feed {
    Chunk(Bytes),
    Close,
    Error(HostError),
}

#[derive(Default)]
struct FeedState {
    backlog: VecDeque<Feed>,
    waiting: Option<(StreamController, Resolver)>,
    cancelled: bool,
}

fn apply(controller: &StreamController, feed: Feed) {
    match feed {
        Feed::Chunk(chunk) => controller.enqueue(chunk),
        Feed::Close => controller.close(),
        Feed::Error(error) => controller.error(error),
    }
}

/// A source that delivers whatever its [`ChannelFeeder`] pushes.
///
/// A pull with nothing fed stays pending, so a stream nobody feeds never
/// produces data and never finishes.
pub struct ChannelSource {
    state: Arc<Mutex<FeedState>>,
    host: HostHandle,
}

/// The producing half of a [`ChannelSource`]. Usable from any thread.
#[derive(Clone)]
pub struct ChannelFeeder {
    state: Arc<Mutex<FeedState>>,
}

impl ChannelSource {
    pub fn new(host: &HostHandle) -> (ChannelSource, ChannelFeeder) {
        let state = Arc::new(Mutex::new(FeedState::default()));
        (
            ChannelSource {
                state: state.clone(),
                host: host.clone(),
            },
            ChannelFeeder { state },
        )
    }

    /// A readable stream over a fresh channel source.
    pub fn stream(host: &HostHandle) -> (ReadableStream, ChannelFeeder) {
        let (source, feeder) = Self::new(host);
        (ReadableStream::new(host, source), feeder)
    }
}

impl UnderlyingSource for ChannelSource {
    fn pull(&mut self, controller: StreamController) -> Promise {
        let mut state = lock(&self.state);
        match state.backlog.pop_front() {
            Some(feed) => {
                drop(state);
                apply(&controller, feed);
                Promise::resolved(&self.host, HostValue::Undefined)
            }
            None => {
                let (promise, resolver) = Promise::pending(&self.host);
                state.waiting = Some((controller, resolver));
                promise
            }
        }
    }

    fn cancel(&mut self) {
        let mut state = lock(&self.state);
        state.cancelled = true;
        state.backlog.clear();
        state.waiting = None;
    }
}

impl ChannelFeeder {
    pub fn push(&self, chunk: impl Into<Bytes>) {
        self.feed(Feed::Chunk(chunk.into()));
    }

    pub fn close(&self) {
        self.feed(Feed::Close);
    }

    pub fn error(&self, error: HostError) {
        self.feed(Feed::Error(error));
    }

    /// Whether the consumer cancelled the stream.
    pub fn is_cancelled(&self) -> bool {
        lock(&self.state).cancelled
    }

    fn feed(&self, feed: Feed) {
        let mut state = lock(&self.state);
        if state.cancelled {
            return;
        }
        match state.waiting.take() {
            Some((controller, resolver)) => {
                drop(state);
                apply(&controller, feed);
                resolver.resolve(HostValue::Undefined);
            }
            None => state.backlog.push_back(feed),
        }
    }
}

struct ChunkSource {
    chunks: VecDeque<Bytes>,
    host: HostHandle,
}

impl UnderlyingSource for ChunkSource {
    fn pull(&mut self, controller: StreamController) -> Promise {
        match self.chunks.pop_front() {
            Some(chunk) => controller.enqueue(chunk),
            None => controller.close(),
        }
        Promise::resolved(&self.host, HostValue::Undefined)
    }
}

/// A pull-driven stream that yields `chunks` one pull at a time.
pub fn chunk_stream<I, B>(host: &HostHandle, chunks: I) -> ReadableStream
where
    I: IntoIterator<Item = B>,
    B: Into<Bytes>,
{
    ReadableStream::new(
        host,
        ChunkSource {
            chunks: chunks.into_iter().map(Into::into).collect(),
            host: host.clone(),
        },
    )
}

#[derive(Default)]
struct Collected {
    bytes: Vec<u8>,
    writes: usize,
    closed: bool,
}

/// A sink that records everything written to it.
pub struct CollectSink {
    collected: Arc<Mutex<Collected>>,
    host: HostHandle,
}

/// Read access to what a [`CollectSink`] received.
#[derive(Clone)]
pub struct CollectHandle {
    collected: Arc<Mutex<Collected>>,
}

impl CollectSink {
    pub fn new(host: &HostHandle) -> (CollectSink, CollectHandle) {
        let collected = Arc::new(Mutex::new(Collected::default()));
        (
            CollectSink {
                collected: collected.clone(),
                host: host.clone(),
            },
            CollectHandle { collected },
        )
    }

    pub fn writable(host: &HostHandle) -> (WritableStream, CollectHandle) {
        let (sink, handle) = Self::new(host);
        (WritableStream::new(host, sink), handle)
    }
}

impl UnderlyingSink for CollectSink {
    fn write(&mut self, chunk: Bytes) -> Promise {
        let mut collected = lock(&self.collected);
        collected.bytes.extend_from_slice(&chunk);
        collected.writes += 1;
        Promise::resolved(&self.host, HostValue::Undefined)
    }

    fn close(&mut self) -> Promise {
        lock(&self.collected).closed = true;
        Promise::resolved(&self.host, HostValue::Undefined)
    }
}

impl CollectHandle {
    pub fn bytes(&self) -> Vec<u8> {
        lock(&self.collected).bytes.clone()
    }

    pub fn writes(&self) -> usize {
        lock(&self.collected).writes
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.collected).closed
    }
}

/// A sink whose writes never complete.
pub struct StalledSink {
    host: HostHandle,
    // Kept so the write promises stay pending rather than being dropped.
    parked: Vec<Resolver>,
}

impl StalledSink {
    pub fn new(host: &HostHandle) -> Self {
        Self {
            host: host.clone(),
            parked: Vec::new(),
        }
    }
}

impl UnderlyingSink for StalledSink {
    fn write(&mut self, _chunk: Bytes) -> Promise {
        let (promise, resolver) = Promise::pending(&self.host);
        self.parked.push(resolver);
        promise
    }

    fn close(&mut self) -> Promise {
        self.parked.clear();
        Promise::resolved(&self.host, HostValue::Undefined)
    }
}

/// Writes to a loopback socket reappear on its readable side.
struct LoopbackSink {
    feeder: ChannelFeeder,
    host: HostHandle,
}

impl UnderlyingSink for LoopbackSink {
    fn write(&mut self, chunk: Bytes) -> Promise {
        self.feeder.push(chunk);
        Promise::resolved(&self.host, HostValue::Undefined)
    }

    fn close(&mut self) -> Promise {
        self.feeder.close();
        Promise::resolved(&self.host, HostValue::Undefined)
    }
}

fn socket_object(
    host: &HostHandle,
    readable: ReadableStream,
    writable: WritableStream,
    secure: bool,
    start_tls: Option<HostFunction>,
) -> HostValue {
    let close = {
        let host = host.clone();
        let readable = readable.clone();
        let writable = writable.clone();
        HostFunction::new(move |_| {
            if !readable.is_closed() && !readable.is_errored() {
                readable.cancel();
            }
            if !writable.is_closed() {
                writable.close();
            }
            Ok(Promise::resolved(&host, HostValue::Undefined).into())
        })
    };
    let mut socket = Object::new()
        .with("readable", readable)
        .with("writable", writable)
        .with("close", close)
        .with("secure", secure);
    if let Some(start_tls) = start_tls {
        socket.set("startTls", start_tls);
    }
    socket.into()
}

/// A duplex socket whose writes loop back to its readable side.
///
/// `startTls()` returns a fresh loopback socket with `secure: true`; the
/// original socket's streams are left as they were.
pub fn loopback_socket(host: &HostHandle) -> HostValue {
    loopback(host, false)
}

fn loopback(host: &HostHandle, secure: bool) -> HostValue {
    let (readable, feeder) = ChannelSource::stream(host);
    let writable = WritableStream::new(
        host,
        LoopbackSink {
            feeder,
            host: host.clone(),
        },
    );
    let start_tls = (!secure).then(|| {
        let host = host.clone();
        HostFunction::new(move |_| Ok(loopback(&host, true)))
    });
    socket_object(host, readable, writable, secure, start_tls)
}

/// A duplex socket that never delivers data and never accepts a write.
///
/// The returned feeder drives its readable side, should a test want to
/// release a stalled read later.
pub fn stalled_socket(host: &HostHandle) -> (HostValue, ChannelFeeder) {
    let (readable, feeder) = ChannelSource::stream(host);
    let writable = WritableStream::new(host, StalledSink::new(host));
    (socket_object(host, readable, writable, false, None), feeder)
}
