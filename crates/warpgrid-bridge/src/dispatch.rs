//! Entry-point dispatcher.
//!
//! Installs one global callback per trigger kind. When the host invokes
//! one, the callback decodes the payload on the host thread, spawns the
//! registered handler on the task pool and returns a pending promise at
//! once. The handler's outcome settles that promise later, from whichever
//! pool thread ran it, so completions may arrive in any order.
//!
//! ```text
//! host invokes handleRequest(request, { env, ctx })
//!   │
//!   ├── decode Request (host thread)
//!   ├── spawn handler (pool thread) ──► Response ──► encode
//!   │                                        │
//!   ▼                                        ▼
//! pending promise returned          promise resolved / rejected
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, error, info_span};
use warpgrid_host_api::{GlobalScope, HostError, HostFunction, HostValue, Promise};

use crate::context::RuntimeContext;
use crate::envelope::{Request, Response};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::BridgeHandle;
use crate::trigger::{EmailMessage, MessageBatch, ScheduledEvent, Trigger, TriggerKind};

/// Positional arguments every callback accepts: payload and runtime context.
const MAX_ARGS: usize = 2;

/// Handler for inbound requests.
pub type RequestHandler =
    Arc<dyn Fn(Request, RuntimeContext) -> anyhow::Result<Response> + Send + Sync>;

/// Handler for cron ticks.
pub type ScheduledHandler =
    Arc<dyn Fn(ScheduledEvent, RuntimeContext) -> anyhow::Result<()> + Send + Sync>;

/// Handler for queue batches.
pub type QueueHandler =
    Arc<dyn Fn(MessageBatch, RuntimeContext) -> anyhow::Result<()> + Send + Sync>;

/// Handler for inbound email.
pub type EmailHandler =
    Arc<dyn Fn(EmailMessage, RuntimeContext) -> anyhow::Result<()> + Send + Sync>;

/// One handler slot per trigger kind.
#[derive(Clone, Default)]
pub struct Handlers {
    pub request: Option<RequestHandler>,
    pub scheduled: Option<ScheduledHandler>,
    pub queue: Option<QueueHandler>,
    pub email: Option<EmailHandler>,
}

impl Handlers {
    pub fn is_registered(&self, kind: TriggerKind) -> bool {
        match kind {
            TriggerKind::Request => self.request.is_some(),
            TriggerKind::Scheduled => self.scheduled.is_some(),
            TriggerKind::Queue => self.queue.is_some(),
            TriggerKind::Email => self.email.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        !TriggerKind::ALL.iter().any(|&kind| self.is_registered(kind))
    }
}

/// Handler registration: written during setup, frozen at readiness.
#[derive(Default)]
pub struct Registry {
    setup: Mutex<Handlers>,
    frozen: OnceLock<Handlers>,
}

impl Registry {
    /// Change a slot; fails once the registry is frozen.
    pub fn update(&self, f: impl FnOnce(&mut Handlers)) -> BridgeResult<()> {
        if self.frozen.get().is_some() {
            return Err(BridgeError::AlreadyReady);
        }
        f(&mut self.setup.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }

    /// Freeze the current registrations; returns them on first call only.
    pub fn freeze(&self) -> BridgeResult<&Handlers> {
        let handlers = self
            .setup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if handlers.is_empty() {
            return Err(BridgeError::NoHandlers);
        }
        self.frozen
            .set(handlers)
            .map_err(|_| BridgeError::AlreadyReady)?;
        self.frozen.get().ok_or(BridgeError::AlreadyReady)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// The handlers an invocation should see right now.
    pub fn snapshot(&self) -> Handlers {
        match self.frozen.get() {
            Some(handlers) => handlers.clone(),
            None => self
                .setup
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Install the four global callbacks.
pub fn install(global: &GlobalScope, registry: &Arc<Registry>, bridge: &BridgeHandle) {
    for kind in TriggerKind::ALL {
        let registry = registry.clone();
        let bridge = bridge.clone();
        global.set_function(
            kind.callback_name(),
            HostFunction::new(move |args| Ok(invoke(kind, &registry, &bridge, args).into())),
        );
    }
}

/// Handle one host invocation. Runs on the host thread and never blocks.
fn invoke(
    kind: TriggerKind,
    registry: &Registry,
    bridge: &BridgeHandle,
    args: Vec<HostValue>,
) -> Promise {
    let host = bridge.host();
    if args.len() > MAX_ARGS {
        let err = HostError::new(format!("too many args given to {kind}: {}", args.len()));
        error!(callback = %kind, error = %err, "invocation rejected");
        return Promise::rejected(host, err);
    }
    let mut args = args.into_iter();
    let payload = args.next().unwrap_or_default();
    let context = RuntimeContext::new(args.next().unwrap_or_default(), bridge.clone());

    let handlers = registry.snapshot();
    if !handlers.is_registered(kind) {
        let err = BridgeError::NotRegistered(kind.callback_name());
        error!(callback = %kind, "invoked before a handler was registered");
        return Promise::rejected(host, err.to_host_error());
    }

    let trigger = match Trigger::decode(kind, &payload) {
        Ok(trigger) => trigger,
        Err(err) => {
            error!(callback = %kind, error = %err, "failed to decode invocation payload");
            return Promise::rejected(host, err.to_host_error());
        }
    };

    let (promise, resolver) = Promise::pending(host);
    let task_bridge = bridge.clone();
    bridge.spawner().spawn_handler(move || {
        let span = info_span!("invocation", callback = %kind);
        let _entered = span.enter();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            run(trigger, &handlers, context, &task_bridge)
        }));
        match outcome {
            Ok(Ok(value)) => {
                debug!("handler finished");
                resolver.resolve(value);
            }
            Ok(Err(err)) => {
                let message = format!("{err:#}");
                error!(error = %message, "handler failed");
                resolver.reject(HostError::new(message));
            }
            Err(payload) => {
                let message = format!("handler panicked: {}", panic_message(payload.as_ref()));
                error!(error = %message, "handler panicked");
                resolver.reject(HostError::new(message));
            }
        }
    });
    promise
}

/// Run the handler for `trigger` to completion and encode its result.
fn run(
    trigger: Trigger,
    handlers: &Handlers,
    context: RuntimeContext,
    bridge: &BridgeHandle,
) -> anyhow::Result<HostValue> {
    let not_registered = |kind: TriggerKind| BridgeError::NotRegistered(kind.callback_name());
    match trigger {
        Trigger::Request(request) => {
            let handler = handlers
                .request
                .as_ref()
                .ok_or_else(|| not_registered(TriggerKind::Request))?;
            let response = handler(request, context)?;
            Ok(response.into_host(bridge)?)
        }
        Trigger::Scheduled(event) => {
            let handler = handlers
                .scheduled
                .as_ref()
                .ok_or_else(|| not_registered(TriggerKind::Scheduled))?;
            handler(event, context)?;
            Ok(HostValue::Undefined)
        }
        Trigger::Queue(batch) => {
            let handler = handlers
                .queue
                .as_ref()
                .ok_or_else(|| not_registered(TriggerKind::Queue))?;
            handler(batch, context)?;
            Ok(HostValue::Undefined)
        }
        Trigger::Email(email) => {
            let handler = handlers
                .email
                .as_ref()
                .ok_or_else(|| not_registered(TriggerKind::Email))?;
            handler(email, context)?;
            Ok(HostValue::Undefined)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}
