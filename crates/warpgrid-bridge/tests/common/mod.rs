//! Shared setup for bridge integration tests.

#![allow(dead_code)]

use std::sync::{mpsc, Once};
use std::time::Duration;

use warpgrid_bridge::{Bridge, BridgeConfig};
use warpgrid_host_api::{EventLoop, GlobalScope, HostError, HostValue, Promise};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for test output, controlled by `RUST_LOG`.
/// Only the first call takes effect.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A host event loop, its global scope and a bridge installed on it.
pub struct Harness {
    pub bridge: Bridge,
    pub global: GlobalScope,
    pub event_loop: EventLoop,
}

pub fn harness() -> Harness {
    harness_with(&BridgeConfig::default())
}

pub fn harness_with(config: &BridgeConfig) -> Harness {
    init_tracing();
    let event_loop = EventLoop::start().expect("start host event loop");
    let global = GlobalScope::new(&event_loop.handle());
    let bridge = Bridge::new(global.clone(), config).expect("create bridge");
    Harness {
        bridge,
        global,
        event_loop,
    }
}

/// Block the test thread until `promise` settles, failing after five seconds.
pub fn outcome(promise: &Promise) -> Result<HostValue, HostError> {
    let (tx, rx) = mpsc::channel();
    promise.on_settle(move |o| {
        let _ = tx.send(o);
    });
    rx.recv_timeout(Duration::from_secs(5))
        .expect("promise did not settle within five seconds")
}
