//! The single host thread.
//!
//! The host runs every callback on one thread, one at a time, in the order
//! they were queued. [`EventLoop`] owns that thread; [`HostHandle`] is the
//! cloneable way to queue work onto it from anywhere.

use std::cell::Cell;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

thread_local! {
    static ON_HOST_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` when called from the host event loop thread.
///
/// Blocking on the host thread deadlocks the whole process, so every
/// blocking entry point in the bridge checks this first.
pub fn on_host_thread() -> bool {
    ON_HOST_THREAD.with(|flag| flag.get())
}

/// Cloneable handle for queueing jobs onto the host thread.
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl HostHandle {
    /// Queue `job` to run on the host thread after everything already queued.
    ///
    /// If the loop has stopped the job is dropped, which drops anything it
    /// captured (resolvers included).
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Message::Run(Box::new(job))).is_err() {
            debug!("host event loop stopped; dropping job");
        }
    }

    /// Run `f` on the host thread and wait for its result.
    ///
    /// Returns `None` if the loop stopped before running `f`.
    ///
    /// # Panics
    ///
    /// Panics when called from the host thread itself.
    pub fn call<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> Option<R> {
        assert!(
            !on_host_thread(),
            "HostHandle::call on the host thread would deadlock"
        );
        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let _ = tx.send(f());
        });
        rx.blocking_recv().ok()
    }

    /// Wait until every job queued before this call has run.
    pub fn flush(&self) {
        let _ = self.call(|| ());
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Owner of the host thread.
///
/// Dropping the loop stops it after the jobs already queued have run.
pub struct EventLoop {
    handle: HostHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Start a host thread named `warpgrid-host`.
    pub fn start() -> io::Result<Self> {
        Self::with_name("warpgrid-host")
    }

    pub fn with_name(name: &str) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                ON_HOST_THREAD.with(|flag| flag.set(true));
                debug!("host event loop started");
                while let Some(message) = rx.blocking_recv() {
                    match message {
                        Message::Run(job) => {
                            // A throwing callback must not take the loop down with it.
                            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                error!("host callback panicked");
                            }
                        }
                        Message::Stop => break,
                    }
                }
                debug!("host event loop stopped");
            })?;
        Ok(Self {
            handle: HostHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> HostHandle {
        self.handle.clone()
    }

    /// Stop the loop and join its thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.handle.tx.send(Message::Stop);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if on_host_thread() {
            // Dropped from inside a job; the loop exits once this job returns.
            return;
        }
        if thread.join().is_err() {
            error!("host thread panicked during shutdown");
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
