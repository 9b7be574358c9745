//! warpgrid-host-api — the host object model seen by the blocking bridge.
//!
//! The embedding host is single-threaded and cooperative: it runs one
//! callback at a time, never blocks, and expresses every asynchronous result
//! as a deferred handle. This crate models exactly the host surface the
//! bridge touches:
//!
//! - **value**: dynamic host values ([`HostValue`]), objects and callable functions
//! - **error**: host `Error` objects ([`HostError`])
//! - **event_loop**: the single host thread and its job queue ([`EventLoop`], [`HostHandle`])
//! - **promise**: settle-once deferred result handles ([`Promise`], [`Resolver`])
//! - **stream**: push/pull readable streams and writable streams
//! - **headers**: fetch-style header lists ([`Headers`])
//! - **global**: the named callback slots and the `ready` hook ([`GlobalScope`])
//! - **testing**: in-memory sources, sinks and duplex sockets
//!
//! # Threading
//!
//! Host objects are internally synchronized so that blocking code may call
//! into them from any thread, but every *callback* they run (promise
//! reactions, `pull`, `cancel`) is posted to the host thread. Code running on
//! the host thread must never block; [`on_host_thread`] lets callers assert
//! that.

pub mod error;
pub mod event_loop;
pub mod global;
pub mod headers;
pub mod promise;
pub mod stream;
pub mod testing;
pub mod value;

pub use error::HostError;
pub use event_loop::{on_host_thread, EventLoop, HostHandle};
pub use global::GlobalScope;
pub use headers::Headers;
pub use promise::{Promise, Resolver};
pub use stream::{
    ReadableStream, StreamController, UnderlyingSink, UnderlyingSource, WritableStream,
};
pub use value::{HostFunction, HostValue, Object};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a host-object mutex, recovering from poisoning.
///
/// A panicking host callback must not wedge every later access to the same
/// object; the state behind these locks stays consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
