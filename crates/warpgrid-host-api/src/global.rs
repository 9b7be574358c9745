//! The host global scope: named callback slots and the `ready` hook.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::lock;
use crate::promise::Promise;
use crate::value::{HostFunction, HostValue};

type ReadyHook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Inner {
    functions: HashMap<String, HostFunction>,
    ready: bool,
    ready_hooks: Vec<ReadyHook>,
}

/// The host's global object, as far as the bridge can see it.
#[derive(Clone)]
pub struct GlobalScope {
    inner: Arc<Mutex<Inner>>,
    host: HostHandle,
}

impl GlobalScope {
    pub fn new(host: &HostHandle) -> Self {
        Self {
            inner: Arc::default(),
            host: host.clone(),
        }
    }

    /// Install `function` under `name`, replacing any earlier one.
    pub fn set_function(&self, name: &str, function: HostFunction) {
        debug!(name, "global callback installed");
        lock(&self.inner).functions.insert(name.to_string(), function);
    }

    pub fn get_function(&self, name: &str) -> Option<HostFunction> {
        lock(&self.inner).functions.get(name).cloned()
    }

    /// Call the global `name` on the host thread, as the host does for an
    /// incoming invocation.
    ///
    /// The callback's return value must be a promise; a synchronous throw or a
    /// non-promise return becomes a rejected promise.
    pub fn invoke(&self, name: &str, args: Vec<HostValue>) -> Promise {
        let (promise, resolver) = Promise::pending(&self.host);
        let function = self.get_function(name);
        let name = name.to_string();
        self.host.post(move || {
            let Some(function) = function else {
                resolver.reject(HostError::type_error(format!("{name} is not a function")));
                return;
            };
            match function.call(args) {
                Ok(HostValue::Promise(returned)) => resolver.follow(&returned),
                Ok(other) => resolver.reject(HostError::type_error(format!(
                    "{name} returned {} instead of a Promise",
                    other.type_name()
                ))),
                Err(thrown) => resolver.reject(thrown),
            }
        });
        promise
    }

    /// Run `hook` once the process signals readiness (immediately if it
    /// already has). Hooks run on the host thread.
    pub fn on_ready(&self, hook: impl FnOnce() + Send + 'static) {
        let mut inner = lock(&self.inner);
        if inner.ready {
            drop(inner);
            self.host.post(hook);
        } else {
            inner.ready_hooks.push(Box::new(hook));
        }
    }

    /// The process's one `ready` call. Later calls are ignored and return
    /// `false`.
    pub fn signal_ready(&self) -> bool {
        let hooks = {
            let mut inner = lock(&self.inner);
            if inner.ready {
                return false;
            }
            inner.ready = true;
            std::mem::take(&mut inner.ready_hooks)
        };
        info!("host notified: ready for invocations");
        for hook in hooks {
            self.host.post(hook);
        }
        true
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.inner).ready
    }

    pub fn host(&self) -> &HostHandle {
        &self.host
    }
}

impl fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        let mut names: Vec<&String> = inner.functions.keys().collect();
        names.sort();
        f.debug_struct("GlobalScope")
            .field("functions", &names)
            .field("ready", &inner.ready)
            .finish()
    }
}
