//! Blocking reader → host readable stream.

use std::any::Any;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::{debug, error};
use warpgrid_host_api::{
    HostError, HostValue, Promise, ReadableStream, StreamController, UnderlyingSource,
};

use crate::handle::BridgeHandle;
use crate::stream::PipeCloser;

struct Inner {
    reader: Option<Box<dyn Read + Send>>,
    buf: Vec<u8>,
}

/// Feeds a host stream from a blocking [`Read`].
///
/// Each host `pull` reads at most one chunk on a pool thread. End of data
/// closes the stream. So does a broken-pipe error: the producer side of an
/// in-process pipe may already be gone when the host pulls, and that is
/// indistinguishable from a clean finish (this also hides a genuinely
/// aborted producer). Any other read error errors the stream. In every
/// terminal case the reader is dropped.
///
/// A host `cancel` closes the source at once, even while a pull is blocked
/// inside `read`, when the reader is a [`PipeReader`](super::PipeReader)
/// or a closer was attached with [`ReaderSource::with_closer`]. Otherwise
/// the reader is dropped once the blocked read returns.
pub struct ReaderSource {
    inner: Arc<Mutex<Inner>>,
    cancelled: Arc<AtomicBool>,
    closer: Option<PipeCloser>,
    bridge: BridgeHandle,
}

impl ReaderSource {
    pub fn new<R: Read + Send + 'static>(reader: R, bridge: &BridgeHandle) -> Self {
        let closer = (&reader as &dyn Any)
            .downcast_ref::<super::PipeReader>()
            .map(super::PipeReader::closer);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                reader: Some(Box::new(reader)),
                buf: Vec::new(),
            })),
            cancelled: Arc::new(AtomicBool::new(false)),
            closer,
            bridge: bridge.clone(),
        }
    }

    /// Close `closer` when the host cancels the stream.
    pub fn with_closer(mut self, closer: PipeCloser) -> Self {
        self.closer = Some(closer);
        self
    }

    /// A host stream that pulls from `reader`.
    pub fn into_stream(self) -> ReadableStream {
        let host = self.bridge.host().clone();
        ReadableStream::new(&host, self)
    }
}

enum Step {
    Chunk(Bytes),
    End,
    Failed(io::Error),
}

fn read_step(inner: &mut Inner, chunk_size: usize) -> Step {
    let Inner { reader, buf } = inner;
    let Some(source) = reader.as_mut() else {
        return Step::End;
    };
    buf.resize(chunk_size, 0);
    loop {
        return match source.read(buf) {
            Ok(0) => Step::End,
            Ok(n) => Step::Chunk(Bytes::copy_from_slice(&buf[..n])),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Step::End,
            Err(err) => Step::Failed(err),
        };
    }
}

impl UnderlyingSource for ReaderSource {
    fn pull(&mut self, controller: StreamController) -> Promise {
        let (promise, resolver) = Promise::pending(self.bridge.host());
        let inner = self.inner.clone();
        let cancelled = self.cancelled.clone();
        let chunk_size = self.bridge.chunk_size();

        self.bridge.spawner().spawn_blocking(move || {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            let step = read_step(&mut inner, chunk_size);
            if cancelled.load(Ordering::Acquire) {
                inner.reader = None;
                resolver.resolve(HostValue::Undefined);
                return;
            }
            match step {
                Step::Chunk(chunk) => {
                    debug!(len = chunk.len(), "reader chunk enqueued");
                    controller.enqueue(chunk);
                }
                Step::End => {
                    inner.reader = None;
                    controller.close();
                }
                Step::Failed(err) => {
                    error!(error = %err, "reader failed; erroring host stream");
                    inner.reader = None;
                    controller.error(HostError::new(err.to_string()));
                }
            }
            resolver.resolve(HostValue::Undefined);
        });
        promise
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(closer) = &self.closer {
            closer.close();
        }
        // A pull holding the lock drops the reader itself once its read returns.
        if let Ok(mut inner) = self.inner.try_lock() {
            inner.reader = None;
        }
        debug!("reader source cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use warpgrid_host_api::EventLoop;

    use crate::config::BridgeConfig;
    use crate::deferred;
    use crate::stream::{pipe, HostStreamReader};
    use crate::task::TaskPool;
    use std::io::Write;
    use std::time::Duration;

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"))
        }
    }

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Read for DropFlag {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn bridge(event_loop: &EventLoop, pool: &TaskPool, chunk_size: usize) -> BridgeHandle {
        BridgeHandle::new(event_loop.handle(), pool.spawner()).with_chunk_size(chunk_size)
    }

    #[test]
    fn reads_in_chunk_sized_pieces() {
        let event_loop = EventLoop::start().unwrap();
        let pool = TaskPool::new(&BridgeConfig::default()).unwrap();
        let bridge = bridge(&event_loop, &pool, 4);
        let data: Vec<u8> = (0..10).collect();

        let stream = ReaderSource::new(Cursor::new(data.clone()), &bridge).into_stream();
        let mut reader = HostStreamReader::new(stream);

        let mut sizes = Vec::new();
        while let Some(chunk) = reader.read_chunk().unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn broken_pipe_reads_as_end_of_data() {
        let event_loop = EventLoop::start().unwrap();
        let pool = TaskPool::new(&BridgeConfig::default()).unwrap();
        let bridge = bridge(&event_loop, &pool, 16);

        let mut reader = HostStreamReader::new(ReaderSource::new(BrokenPipe, &bridge).into_stream());
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).unwrap(), 0);
    }

    #[test]
    fn other_read_errors_error_the_stream() {
        let event_loop = EventLoop::start().unwrap();
        let pool = TaskPool::new(&BridgeConfig::default()).unwrap();
        let bridge = bridge(&event_loop, &pool, 16);

        let stream = ReaderSource::new(Failing, &bridge).into_stream();
        let mut reader = HostStreamReader::new(stream.clone());
        let err = reader.read_chunk().unwrap_err();
        assert!(err.to_string().contains("peer reset"));
        assert!(stream.is_errored());
    }

    #[test]
    fn cancel_drops_the_reader() {
        let event_loop = EventLoop::start().unwrap();
        let pool = TaskPool::new(&BridgeConfig::default()).unwrap();
        let bridge = bridge(&event_loop, &pool, 16);
        let dropped = Arc::new(AtomicBool::new(false));

        let stream = ReaderSource::new(DropFlag(dropped.clone()), &bridge).into_stream();
        let mut reader = HostStreamReader::new(stream);
        reader.close().unwrap();

        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_closes_a_pipe_while_a_pull_is_blocked() {
        let event_loop = EventLoop::start().unwrap();
        let pool = TaskPool::new(&BridgeConfig::default()).unwrap();
        let bridge = bridge(&event_loop, &pool, 16);
        let (reader, mut writer) = pipe();

        let stream = ReaderSource::new(reader, &bridge).into_stream();
        writer.write_all(b"first").unwrap();
        let first = deferred::wait(&stream.read()).unwrap();
        assert_eq!(first.get("value").as_bytes().map(|b| b.as_ref()), Some(&b"first"[..]));

        // The next pull parks on the idle pipe.
        let parked = stream.read();
        std::thread::sleep(Duration::from_millis(20));
        let _ = stream.cancel();
        event_loop.handle().flush();

        let err = writer.write(b"lost").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        let done = deferred::wait(&parked).unwrap();
        assert_eq!(done.get("done").as_bool(), Some(true));
    }

    #[test]
    fn attached_closer_closes_a_wrapped_pipe() {
        let event_loop = EventLoop::start().unwrap();
        let pool = TaskPool::new(&BridgeConfig::default()).unwrap();
        let bridge = bridge(&event_loop, &pool, 16);
        let (reader, mut writer) = pipe();
        let closer = reader.closer();

        let stream = ReaderSource::new(io::BufReader::new(reader), &bridge)
            .with_closer(closer)
            .into_stream();
        let parked = stream.read();
        std::thread::sleep(Duration::from_millis(20));
        let _ = stream.cancel();
        event_loop.handle().flush();

        assert_eq!(writer.write(b"x").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(deferred::wait(&parked).unwrap().get("done").as_bool(), Some(true));
    }
}
