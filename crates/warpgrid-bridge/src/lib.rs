//! warpgrid-bridge — blocking code on a cooperative, promise-based host.
//!
//! The host runs one callback at a time and never blocks; every result it
//! produces arrives later through a promise. Handlers written against this
//! crate are ordinary blocking code: they read request bodies through
//! [`std::io::Read`], write sockets through [`std::io::Write`] and return a
//! value. The bridge keeps the two worlds apart.
//!
//! # Architecture
//!
//! ```text
//! host thread                          task pool
//! ───────────                          ─────────
//! handleRequest(req, { env, ctx })
//!   ├── decode envelope
//!   ├── spawn ───────────────────────► handler(Request, RuntimeContext)
//!   └── return pending promise           ├── body.read()  ─┐
//!                                        │                 │ deferred::wait
//! stream pull / promise reactions ◄──────┼─────────────────┘
//!                                        └── Response
//! promise resolved ◄──────────────────── encode envelope
//! ```
//!
//! - **deferred**: block a pool thread on a host promise
//! - **stream**: host streams as `Read`, `Read` as host streams, in-process pipes
//! - **envelope**: request, response and header codec
//! - **trigger**: scheduled, queue and email payloads
//! - **dispatch**: the global callbacks the host invokes
//! - **lifecycle**: handler registration and the one-time ready signal
//! - **socket**: deadline-aware duplex sockets
//! - **fetch**: outbound HTTP through the host's `fetch`
//! - **context**: environment, bindings and `waitUntil`
//!
//! Nothing here installs a tracing subscriber; embedders choose their own.

pub mod config;
pub mod context;
pub mod deferred;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod fetch;
pub mod handle;
pub mod lifecycle;
pub mod socket;
pub mod stream;
pub mod task;
pub mod trigger;

pub use config::BridgeConfig;
pub use context::{Binding, RuntimeContext};
pub use envelope::{Body, HeaderMap, Request, Response};
pub use error::{is_deadline_exceeded, BridgeError, BridgeResult};
pub use fetch::{fetch, Client, RedirectMode, RequestInit};
pub use handle::BridgeHandle;
pub use lifecycle::{Bridge, LifecycleState, ShutdownHandle};
pub use socket::{connect, SecureTransport, Socket, SocketOptions};
pub use stream::{pipe, HostStreamReader, PipeCloser, PipeReader, PipeWriter, ReaderSource};
pub use task::{Spawner, TaskPool};
pub use trigger::{EmailMessage, MessageBatch, QueueMessage, ScheduledEvent, Trigger, TriggerKind};
