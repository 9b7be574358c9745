//! Per-invocation runtime context: environment, bindings and `waitUntil`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};
use warpgrid_host_api::{HostError, HostValue, Object, Promise};

use crate::error::{BridgeError, BridgeResult};
use crate::handle::BridgeHandle;

/// A named host binding (a namespace, queue, database, function, ...).
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub value: HostValue,
}

/// What the host passed alongside a trigger payload: `{ env, ctx }`.
///
/// `env` holds environment variables and bindings; `ctx` is the execution
/// context (`waitUntil`). Any other entry, such as `connect`, is reachable
/// through [`RuntimeContext::value`].
#[derive(Clone)]
pub struct RuntimeContext {
    raw: HostValue,
    bridge: BridgeHandle,
}

impl RuntimeContext {
    pub fn new(raw: HostValue, bridge: BridgeHandle) -> Self {
        Self { raw, bridge }
    }

    /// A context with no environment, for invocations that carried none.
    pub fn detached(bridge: BridgeHandle) -> Self {
        Self::new(HostValue::Undefined, bridge)
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    fn env(&self) -> &HostValue {
        self.raw.get("env")
    }

    /// A string environment variable.
    pub fn var(&self, name: &str) -> Option<String> {
        self.env().get(name).as_str().map(str::to_string)
    }

    /// A binding by name; `None` when missing.
    pub fn binding(&self, name: &str) -> Option<Binding> {
        let value = self.env().get(name);
        (!value.is_undefined()).then(|| Binding {
            name: name.to_string(),
            value: value.clone(),
        })
    }

    /// Every entry of `env`.
    pub fn bindings(&self) -> Vec<Binding> {
        self.env()
            .as_object()
            .map(|env| {
                env.iter()
                    .map(|(name, value)| Binding {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Any other runtime-context entry.
    pub fn value(&self, key: &str) -> Option<&HostValue> {
        let value = self.raw.get(key);
        (!value.is_undefined()).then_some(value)
    }

    /// Keep the invocation alive until `task` finishes.
    ///
    /// `task` runs on the task pool; the host's `ctx.waitUntil` receives a
    /// promise that settles when it is done. Blocks only until the host has
    /// accepted the promise.
    pub fn wait_until<F>(&self, task: F) -> BridgeResult<()>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let wait_until = self
            .raw
            .get("ctx")
            .get("waitUntil")
            .as_function()
            .cloned()
            .ok_or_else(|| BridgeError::decode("ctx.waitUntil is not available"))?;

        let host = self.bridge.host().clone();
        let (promise, resolver) = Promise::pending(&host);
        self.bridge.spawner().spawn_handler(move || {
            match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(())) => resolver.resolve(HostValue::Undefined),
                Ok(Err(err)) => {
                    error!(error = %format!("{err:#}"), "waitUntil task failed");
                    resolver.reject(HostError::new(format!("{err:#}")));
                }
                Err(_) => {
                    error!("waitUntil task panicked");
                    resolver.reject(HostError::new("waitUntil task panicked"));
                }
            }
        });

        debug!("registering waitUntil task");
        host.call(move || wait_until.call(vec![promise.into()]))
            .ok_or(BridgeError::Abandoned)?
            .map(drop)
            .map_err(BridgeError::Host)
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .env()
            .as_object()
            .map(|env| env.keys().map(str::to_string).collect())
            .unwrap_or_default();
        f.debug_struct("RuntimeContext").field("env", &keys).finish()
    }
}

/// Build a `{ env, ctx }` runtime-context object.
pub fn runtime_context_object(env: Object, ctx: Object) -> HostValue {
    Object::new().with("env", env).with("ctx", ctx).into()
}
