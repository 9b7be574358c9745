//! Task spawning.
//!
//! Every blocking piece of bridge work runs on pool threads, never on the
//! host thread. Handlers (and their `waitUntil` tasks) get their own blocking
//! pool. Push-stream reads and socket operations run on the I/O runtime, so
//! handlers parked on that work cannot use up the threads it needs.

use std::future::Future;
use std::io;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::BridgeConfig;

/// Owner of the bridge's worker runtimes.
///
/// Dropping the pool waits for running blocking tasks only as long as the
/// tokio runtimes do; tasks still blocked on the host are abandoned.
pub struct TaskPool {
    io: Option<Runtime>,
    handlers: Option<Runtime>,
    spawner: Spawner,
}

/// Cloneable handle for spawning work onto a [`TaskPool`].
#[derive(Clone, Debug)]
pub struct Spawner {
    handle: Handle,
    handlers: Handle,
}

impl TaskPool {
    pub fn new(config: &BridgeConfig) -> io::Result<Self> {
        let io = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .max_blocking_threads(config.max_blocking_threads)
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()?;
        let handlers = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.max_handler_threads)
            .thread_name(format!("{}-handler", config.thread_name))
            .enable_time()
            .build()?;
        debug!(
            worker_threads = config.worker_threads,
            max_blocking_threads = config.max_blocking_threads,
            max_handler_threads = config.max_handler_threads,
            "bridge task pool started"
        );
        let spawner = Spawner {
            handle: io.handle().clone(),
            handlers: handlers.handle().clone(),
        };
        Ok(Self {
            io: Some(io),
            handlers: Some(handlers),
            spawner,
        })
    }

    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        // Safe to call from inside a runtime, unlike a plain drop.
        for runtime in [self.handlers.take(), self.io.take()].into_iter().flatten() {
            runtime.shutdown_background();
        }
    }
}

impl Spawner {
    /// Run user handler code on the handler pool.
    pub fn spawn_handler<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handlers.spawn_blocking(f)
    }

    /// Run bridge I/O `f` on a blocking thread of the I/O runtime.
    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn_blocking(f)
    }

    /// Drive `future` to completion on the pool from a blocking thread.
    ///
    /// Must not be called from inside an async task of the pool.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}
