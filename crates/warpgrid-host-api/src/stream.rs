//! Host byte streams.
//!
//! [`ReadableStream`] is a queue of byte chunks fed either up front
//! ([`ReadableStream::from_chunks`]) or on demand by an
//! [`UnderlyingSource`]. Reads return promises of `{ done, value }` objects.
//! The source is pulled on the host thread, only while a read is waiting on
//! an empty queue, and never with more than one pull in flight.
//!
//! [`WritableStream`] forwards writes, in call order, to an
//! [`UnderlyingSink`] on the host thread.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use tracing::debug;

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::lock;
use crate::promise::{Promise, Resolver};
use crate::value::{HostValue, Object};

/// Producer side of a pull-driven [`ReadableStream`].
///
/// Both methods run on the host thread and must not block. `pull` returns a
/// promise that settles once the source has enqueued, closed or errored (or
/// decided to do nothing yet); a rejection errors the stream.
pub trait UnderlyingSource: Send + 'static {
    fn pull(&mut self, controller: StreamController) -> Promise;

    /// The consumer cancelled the stream; release the producer.
    fn cancel(&mut self) {}
}

/// Consumer side of a [`WritableStream`].
///
/// Called on the host thread, one call at a time, in write order.
pub trait UnderlyingSink: Send + 'static {
    fn write(&mut self, chunk: Bytes) -> Promise;

    fn close(&mut self) -> Promise;
}

#[derive(Debug, Clone)]
enum ReadState {
    Readable,
    Closed,
    Errored(HostError),
}

struct ReadInner {
    queue: VecDeque<Bytes>,
    state: ReadState,
    pending_reads: VecDeque<Resolver>,
    pulling: bool,
    disturbed: bool,
}

struct ReadShared {
    inner: Mutex<ReadInner>,
    source: Mutex<Option<Box<dyn UnderlyingSource>>>,
    host: HostHandle,
}

/// A host readable byte stream.
#[derive(Clone)]
pub struct ReadableStream {
    shared: Arc<ReadShared>,
}

/// Handle a source uses to feed its stream.
///
/// Holds the stream weakly: once every stream handle is gone, controller
/// calls are ignored.
#[derive(Clone)]
pub struct StreamController {
    shared: Weak<ReadShared>,
}

/// Build a `{ done, value }` read result object.
pub fn read_result(chunk: Option<Bytes>) -> HostValue {
    match chunk {
        Some(chunk) => Object::new().with("done", false).with("value", chunk),
        None => Object::new()
            .with("done", true)
            .with("value", HostValue::Undefined),
    }
    .into()
}

impl ReadableStream {
    /// A stream fed on demand by `source`.
    pub fn new(host: &HostHandle, source: impl UnderlyingSource) -> Self {
        Self::build(host, VecDeque::new(), ReadState::Readable, Some(Box::new(source)))
    }

    /// A closed stream that yields `chunks` and then reports done.
    pub fn from_chunks(host: &HostHandle, chunks: impl IntoIterator<Item = Bytes>) -> Self {
        let queue = chunks.into_iter().filter(|c| !c.is_empty()).collect();
        Self::build(host, queue, ReadState::Closed, None)
    }

    pub fn empty(host: &HostHandle) -> Self {
        Self::from_chunks(host, [])
    }

    fn build(
        host: &HostHandle,
        queue: VecDeque<Bytes>,
        state: ReadState,
        source: Option<Box<dyn UnderlyingSource>>,
    ) -> Self {
        Self {
            shared: Arc::new(ReadShared {
                inner: Mutex::new(ReadInner {
                    queue,
                    state,
                    pending_reads: VecDeque::new(),
                    pulling: false,
                    disturbed: false,
                }),
                source: Mutex::new(source),
                host: host.clone(),
            }),
        }
    }

    /// Request the next chunk.
    ///
    /// Resolves with `{ done: false, value: Uint8Array }`, or
    /// `{ done: true }` once the stream is closed and drained; rejects with
    /// the stream's error if it errored.
    pub fn read(&self) -> Promise {
        let host = &self.shared.host;
        let mut inner = lock(&self.shared.inner);
        inner.disturbed = true;
        if let Some(chunk) = inner.queue.pop_front() {
            return Promise::resolved(host, read_result(Some(chunk)));
        }
        match &inner.state {
            ReadState::Closed => Promise::resolved(host, read_result(None)),
            ReadState::Errored(error) => Promise::rejected(host, error.clone()),
            ReadState::Readable => {
                let (promise, resolver) = Promise::pending(host);
                inner.pending_reads.push_back(resolver);
                drop(inner);
                self.pull_if_needed();
                promise
            }
        }
    }

    /// Cancel the stream, discarding queued chunks.
    ///
    /// Rejects with `InvalidStateError` if the stream already finished, and
    /// with the stream's error if it errored.
    pub fn cancel(&self) -> Promise {
        let host = &self.shared.host;
        let pending = {
            let mut inner = lock(&self.shared.inner);
            match &inner.state {
                ReadState::Closed => {
                    return Promise::rejected(
                        host,
                        HostError::invalid_state("stream already closed"),
                    );
                }
                ReadState::Errored(error) => return Promise::rejected(host, error.clone()),
                ReadState::Readable => {}
            }
            inner.state = ReadState::Closed;
            inner.queue.clear();
            std::mem::take(&mut inner.pending_reads)
        };
        for resolver in pending {
            resolver.resolve(read_result(None));
        }
        let shared = self.shared.clone();
        host.post(move || {
            if let Some(mut source) = lock(&shared.source).take() {
                source.cancel();
            }
        });
        debug!("readable stream cancelled");
        Promise::resolved(host, HostValue::Undefined)
    }

    /// Whether anything has read from (or cancelled) this stream yet.
    pub fn is_disturbed(&self) -> bool {
        lock(&self.shared.inner).disturbed
    }

    /// Whether the stream has closed (queued chunks may remain).
    pub fn is_closed(&self) -> bool {
        matches!(lock(&self.shared.inner).state, ReadState::Closed)
    }

    pub fn is_errored(&self) -> bool {
        matches!(lock(&self.shared.inner).state, ReadState::Errored(_))
    }

    pub fn host(&self) -> &HostHandle {
        &self.shared.host
    }

    /// Identity comparison: both handles refer to the same host stream.
    pub fn same_stream(&self, other: &ReadableStream) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn controller(&self) -> StreamController {
        StreamController {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn pull_if_needed(&self) {
        {
            let mut inner = lock(&self.shared.inner);
            let wanted = matches!(inner.state, ReadState::Readable)
                && inner.queue.is_empty()
                && !inner.pending_reads.is_empty();
            if !wanted || inner.pulling {
                return;
            }
            inner.pulling = true;
        }
        let stream = self.clone();
        self.shared.host.post(move || stream.run_pull());
    }

    fn run_pull(&self) {
        if !matches!(lock(&self.shared.inner).state, ReadState::Readable) {
            lock(&self.shared.inner).pulling = false;
            return;
        }
        let promise = {
            let mut source = lock(&self.shared.source);
            match source.as_mut() {
                Some(source) => source.pull(self.controller()),
                None => {
                    lock(&self.shared.inner).pulling = false;
                    return;
                }
            }
        };
        let stream = self.clone();
        promise.on_settle(move |outcome| {
            lock(&stream.shared.inner).pulling = false;
            match outcome {
                Ok(_) => stream.pull_if_needed(),
                Err(error) => stream.controller().error(error),
            }
        });
    }
}

impl fmt::Debug for ReadableStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.shared.inner);
        f.debug_struct("ReadableStream")
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .field("pending_reads", &inner.pending_reads.len())
            .finish()
    }
}

impl StreamController {
    /// Deliver a chunk to the oldest waiting read, or queue it.
    pub fn enqueue(&self, chunk: Bytes) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = lock(&shared.inner);
        if !matches!(inner.state, ReadState::Readable) {
            debug!("enqueue on a finished stream ignored");
            return;
        }
        match inner.pending_reads.pop_front() {
            Some(resolver) => {
                drop(inner);
                resolver.resolve(read_result(Some(chunk)));
            }
            None => inner.queue.push_back(chunk),
        }
    }

    /// Close the stream; waiting reads resolve as done once the queue drains.
    pub fn close(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let pending = {
            let mut inner = lock(&shared.inner);
            if !matches!(inner.state, ReadState::Readable) {
                return;
            }
            inner.state = ReadState::Closed;
            std::mem::take(&mut inner.pending_reads)
        };
        for resolver in pending {
            resolver.resolve(read_result(None));
        }
    }

    /// Error the stream; queued chunks are discarded and waiting reads reject.
    pub fn error(&self, error: HostError) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let pending = {
            let mut inner = lock(&shared.inner);
            if !matches!(inner.state, ReadState::Readable) {
                return;
            }
            inner.state = ReadState::Errored(error.clone());
            inner.queue.clear();
            std::mem::take(&mut inner.pending_reads)
        };
        for resolver in pending {
            resolver.reject(error.clone());
        }
    }
}

impl fmt::Debug for StreamController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamController")
    }
}

struct WriteShared {
    sink: Mutex<Box<dyn UnderlyingSink>>,
    closed: Mutex<bool>,
    host: HostHandle,
}

/// A host writable byte stream.
#[derive(Clone)]
pub struct WritableStream {
    shared: Arc<WriteShared>,
}

impl WritableStream {
    pub fn new(host: &HostHandle, sink: impl UnderlyingSink) -> Self {
        Self {
            shared: Arc::new(WriteShared {
                sink: Mutex::new(Box::new(sink)),
                closed: Mutex::new(false),
                host: host.clone(),
            }),
        }
    }

    /// Queue a chunk; resolves when the sink has accepted it.
    pub fn write(&self, chunk: Bytes) -> Promise {
        let host = &self.shared.host;
        if *lock(&self.shared.closed) {
            return Promise::rejected(host, HostError::type_error("cannot write to a closed stream"));
        }
        let (promise, resolver) = Promise::pending(host);
        let shared = self.shared.clone();
        host.post(move || {
            let accepted = lock(&shared.sink).write(chunk);
            resolver.follow(&accepted);
        });
        promise
    }

    /// Close the stream after all queued writes.
    pub fn close(&self) -> Promise {
        let host = &self.shared.host;
        {
            let mut closed = lock(&self.shared.closed);
            if *closed {
                return Promise::rejected(host, HostError::type_error("stream already closed"));
            }
            *closed = true;
        }
        let (promise, resolver) = Promise::pending(host);
        let shared = self.shared.clone();
        host.post(move || {
            let done = lock(&shared.sink).close();
            resolver.follow(&done);
        });
        promise
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.shared.closed)
    }
}

impl fmt::Debug for WritableStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use std::sync::mpsc;

    fn await_on(promise: &Promise) -> Result<HostValue, HostError> {
        let (tx, rx) = mpsc::channel();
        promise.on_settle(move |outcome| tx.send(outcome).unwrap());
        rx.recv().unwrap()
    }

    /// Emits `remaining` numbered chunks, one per pull, then closes.
    struct Counter {
        next: u8,
        remaining: u8,
        host: HostHandle,
        pulls: Arc<Mutex<u32>>,
    }

    impl UnderlyingSource for Counter {
        fn pull(&mut self, controller: StreamController) -> Promise {
            *self.pulls.lock().unwrap() += 1;
            if self.remaining == 0 {
                controller.close();
            } else {
                controller.enqueue(Bytes::from(vec![self.next]));
                self.next += 1;
                self.remaining -= 1;
            }
            Promise::resolved(&self.host, HostValue::Undefined)
        }
    }

    #[test]
    fn from_chunks_drains_then_reports_done() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let stream = ReadableStream::from_chunks(&host, [Bytes::from("ab"), Bytes::from("c")]);

        let first = await_on(&stream.read()).unwrap();
        assert_eq!(first.get("done").as_bool(), Some(false));
        assert_eq!(first.get("value").as_bytes().unwrap().as_ref(), b"ab");
        await_on(&stream.read()).unwrap();
        let last = await_on(&stream.read()).unwrap();
        assert_eq!(last.get("done").as_bool(), Some(true));
    }

    #[test]
    fn source_is_pulled_once_per_waiting_read() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let pulls = Arc::new(Mutex::new(0));
        let stream = ReadableStream::new(
            &host,
            Counter {
                next: 0,
                remaining: 3,
                host: host.clone(),
                pulls: pulls.clone(),
            },
        );

        let mut seen = Vec::new();
        loop {
            let result = await_on(&stream.read()).unwrap();
            if result.get("done").as_bool() == Some(true) {
                break;
            }
            seen.extend_from_slice(result.get("value").as_bytes().unwrap());
        }

        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(*pulls.lock().unwrap(), 4);
    }

    #[test]
    fn cancel_on_closed_stream_is_invalid_state() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let stream = ReadableStream::empty(&host);

        let err = await_on(&stream.cancel()).unwrap_err();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn cancel_resolves_waiting_reads_as_done() {
        struct Silent;
        impl UnderlyingSource for Silent {
            fn pull(&mut self, controller: StreamController) -> Promise {
                // Never settles: keeps the read waiting.
                let host = controller.shared.upgrade().unwrap().host.clone();
                Promise::pending(&host).0
            }
        }

        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let stream = ReadableStream::new(&host, Silent);
        let read = stream.read();

        await_on(&stream.cancel()).unwrap();
        let result = await_on(&read).unwrap();
        assert_eq!(result.get("done").as_bool(), Some(true));
        assert!(stream.is_disturbed());
    }

    #[test]
    fn controller_error_rejects_reads() {
        struct Failing(HostHandle);
        impl UnderlyingSource for Failing {
            fn pull(&mut self, controller: StreamController) -> Promise {
                controller.error(HostError::new("disk on fire"));
                Promise::resolved(&self.0, HostValue::Undefined)
            }
        }

        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let stream = ReadableStream::new(&host, Failing(host.clone()));

        let err = await_on(&stream.read()).unwrap_err();
        assert_eq!(err.message(), "disk on fire");
        assert!(stream.is_errored());
    }

    #[test]
    fn writes_reach_the_sink_in_order() {
        struct Collect(Arc<Mutex<Vec<u8>>>, HostHandle);
        impl UnderlyingSink for Collect {
            fn write(&mut self, chunk: Bytes) -> Promise {
                self.0.lock().unwrap().extend_from_slice(&chunk);
                Promise::resolved(&self.1, HostValue::Undefined)
            }
            fn close(&mut self) -> Promise {
                Promise::resolved(&self.1, HostValue::Undefined)
            }
        }

        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let collected = Arc::new(Mutex::new(Vec::new()));
        let writable = WritableStream::new(&host, Collect(collected.clone(), host.clone()));

        writable.write(Bytes::from("hello "));
        let last = writable.write(Bytes::from("world"));
        await_on(&last).unwrap();
        await_on(&writable.close()).unwrap();

        assert_eq!(collected.lock().unwrap().as_slice(), b"hello world");
        assert!(await_on(&writable.write(Bytes::from("late"))).is_err());
    }
}
