//! Outbound HTTP through the host's `fetch`.
//!
//! A [`Client`] targets either the runtime context's own `fetch` or a
//! binding that exposes one (a service binding, for example). The request is
//! encoded for the host, the returned promise is awaited on the calling
//! thread, and the response comes back with its body still streaming from
//! the host.

use tracing::debug;
use warpgrid_host_api::{HostFunction, HostValue, Object};

use crate::context::{Binding, RuntimeContext};
use crate::deferred;
use crate::envelope::{Request, Response};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::BridgeHandle;

/// How the host follows redirects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedirectMode {
    #[default]
    Follow,
    Error,
    Manual,
}

impl RedirectMode {
    fn as_str(self) -> &'static str {
        match self {
            RedirectMode::Follow => "follow",
            RedirectMode::Error => "error",
            RedirectMode::Manual => "manual",
        }
    }
}

/// Options passed as the second `fetch` argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestInit {
    pub redirect: Option<RedirectMode>,
}

impl RequestInit {
    fn to_host(self) -> HostValue {
        match self.redirect {
            Some(mode) => Object::new().with("redirect", mode.as_str()).into(),
            None => HostValue::Undefined,
        }
    }
}

fn not_found() -> BridgeError {
    BridgeError::decode("fetch function not found")
}

/// An HTTP client backed by a host `fetch` function.
#[derive(Debug, Clone)]
pub struct Client {
    fetch: HostFunction,
    init: RequestInit,
    bridge: BridgeHandle,
}

impl Client {
    /// The runtime context's own `fetch`.
    pub fn new(ctx: &RuntimeContext) -> BridgeResult<Self> {
        let fetch = ctx
            .value("fetch")
            .and_then(HostValue::as_function)
            .cloned()
            .ok_or_else(not_found)?;
        Ok(Self::with_function(fetch, ctx.bridge()))
    }

    /// The `fetch` method of a binding.
    pub fn for_binding(binding: &Binding, bridge: &BridgeHandle) -> BridgeResult<Self> {
        let fetch = binding
            .value
            .get("fetch")
            .as_function()
            .cloned()
            .ok_or_else(not_found)?;
        Ok(Self::with_function(fetch, bridge))
    }

    fn with_function(fetch: HostFunction, bridge: &BridgeHandle) -> Self {
        Self {
            fetch,
            init: RequestInit::default(),
            bridge: bridge.clone(),
        }
    }

    pub fn with_redirect(mut self, mode: RedirectMode) -> Self {
        self.init.redirect = Some(mode);
        self
    }

    /// Send `request` and block until the host produces a response.
    ///
    /// A synchronous throw and a rejected promise both become errors. The
    /// response body is read from the host on demand.
    ///
    /// # Panics
    ///
    /// When called on the host thread.
    pub fn fetch(&self, request: Request) -> BridgeResult<Response> {
        let method = request.method().to_string();
        let url = request.url().to_string();
        let args = vec![request.into_host(&self.bridge)?, self.init.to_host()];
        let fetch = self.fetch.clone();
        let returned = self
            .bridge
            .host()
            .call(move || fetch.call(args))
            .ok_or(BridgeError::Abandoned)??;

        let value = match returned.as_promise() {
            Some(promise) => deferred::wait(promise)?,
            None => returned,
        };
        let response = Response::from_host(&value)?;
        debug!(%method, %url, status = response.status(), "fetch completed");
        Ok(response)
    }
}

/// Fetch through the runtime context's own `fetch`.
pub fn fetch(ctx: &RuntimeContext, request: Request) -> BridgeResult<Response> {
    Client::new(ctx)?.fetch(request)
}
