//! Lifecycle gate: handler registration, the one-time ready signal and the
//! process run loop.
//!
//! Per trigger kind the bridge moves through
//! `Unregistered → Registered → Ready`. Registration may repeat before
//! ready (last one wins); ready is signalled to the host exactly once and
//! only once something is registered. After that the registry is frozen.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};
use warpgrid_host_api::{on_host_thread, GlobalScope};

use crate::config::BridgeConfig;
use crate::context::RuntimeContext;
use crate::dispatch::{self, Handlers, Registry};
use crate::envelope::{Request, Response};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::BridgeHandle;
use crate::task::TaskPool;
use crate::trigger::{EmailMessage, MessageBatch, ScheduledEvent, TriggerKind};

/// Where one trigger kind stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unregistered,
    Registered,
    Ready,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Unregistered => write!(f, "unregistered"),
            LifecycleState::Registered => write!(f, "registered"),
            LifecycleState::Ready => write!(f, "ready"),
        }
    }
}

/// A bridge bound to one host global scope.
///
/// Owns the task pool that runs handlers; dropping the bridge shuts the
/// pool down.
pub struct Bridge {
    global: GlobalScope,
    registry: Arc<Registry>,
    handle: BridgeHandle,
    shutdown_tx: Arc<watch::Sender<bool>>,
    _pool: TaskPool,
}

/// Stops [`Bridge::run`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn close(&self) {
        self.tx.send_replace(true);
    }
}

impl Bridge {
    /// Start the task pool and install the host callbacks.
    ///
    /// The callbacks reject every invocation until a handler for their kind
    /// is registered.
    pub fn new(global: GlobalScope, config: &BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let pool = TaskPool::new(config)?;
        let handle = BridgeHandle::new(global.host().clone(), pool.spawner())
            .with_chunk_size(config.chunk_size)
            .with_socket_timeout(config.socket.default_timeout());
        let registry = Arc::new(Registry::default());
        dispatch::install(&global, &registry, &handle);
        let (shutdown_tx, _) = watch::channel(false);
        debug!(chunk_size = config.chunk_size, "bridge callbacks installed");
        Ok(Self {
            global,
            registry,
            handle,
            shutdown_tx: Arc::new(shutdown_tx),
            _pool: pool,
        })
    }

    pub fn handle(&self) -> &BridgeHandle {
        &self.handle
    }

    pub fn handle_request<F>(&self, handler: F) -> BridgeResult<()>
    where
        F: Fn(Request, RuntimeContext) -> anyhow::Result<Response> + Send + Sync + 'static,
    {
        self.register(TriggerKind::Request, |h| h.request = Some(Arc::new(handler)))
    }

    pub fn handle_scheduled<F>(&self, handler: F) -> BridgeResult<()>
    where
        F: Fn(ScheduledEvent, RuntimeContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(TriggerKind::Scheduled, |h| h.scheduled = Some(Arc::new(handler)))
    }

    pub fn handle_queue<F>(&self, handler: F) -> BridgeResult<()>
    where
        F: Fn(MessageBatch, RuntimeContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(TriggerKind::Queue, |h| h.queue = Some(Arc::new(handler)))
    }

    pub fn handle_email<F>(&self, handler: F) -> BridgeResult<()>
    where
        F: Fn(EmailMessage, RuntimeContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(TriggerKind::Email, |h| h.email = Some(Arc::new(handler)))
    }

    fn register(&self, kind: TriggerKind, f: impl FnOnce(&mut Handlers)) -> BridgeResult<()> {
        self.registry.update(f)?;
        debug!(callback = %kind, "handler registered");
        Ok(())
    }

    /// Tell the host the process may receive invocations.
    ///
    /// Fails with [`BridgeError::NoHandlers`] when nothing is registered and
    /// with [`BridgeError::AlreadyReady`] on a second call.
    pub fn ready(&self) -> BridgeResult<()> {
        if self.global.is_ready() {
            return Err(BridgeError::AlreadyReady);
        }
        let handlers = self.registry.freeze()?;
        if !self.global.signal_ready() {
            return Err(BridgeError::AlreadyReady);
        }
        let kinds: Vec<&str> = TriggerKind::ALL
            .iter()
            .filter(|&&kind| handlers.is_registered(kind))
            .map(|kind| kind.callback_name())
            .collect();
        info!(handlers = ?kinds, "bridge ready");
        Ok(())
    }

    pub fn state(&self, kind: TriggerKind) -> LifecycleState {
        if !self.registry.snapshot().is_registered(kind) {
            LifecycleState::Unregistered
        } else if self.registry.is_frozen() {
            LifecycleState::Ready
        } else {
            LifecycleState::Registered
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Signal ready, then block until a [`ShutdownHandle`] closes the bridge.
    ///
    /// # Panics
    ///
    /// Panics when called on the host thread.
    pub fn run(&self) -> BridgeResult<()> {
        assert!(!on_host_thread(), "Bridge::run called on the host thread");
        self.ready()?;
        let mut rx = self.shutdown_tx.subscribe();
        self.handle.spawner().block_on(async move {
            // The sender lives in `self`, so this only ends on close.
            let _ = rx.wait_for(|closed| *closed).await;
        });
        info!("bridge shut down");
        Ok(())
    }
}
