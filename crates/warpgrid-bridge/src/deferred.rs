//! Waiting on host promises from blocking code.
//!
//! [`wait`] is the one way bridge code turns a host [`Promise`] into a
//! value: it attaches a fulfilment and a rejection observer, then parks
//! the calling thread until exactly one of them delivers.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::error;
use warpgrid_host_api::{on_host_thread, HostError, HostValue, Promise};

use crate::error::{BridgeError, BridgeResult};

type Outcome = Result<HostValue, HostError>;

/// One awaited host operation: a single delivery slot shared by both
/// observers.
struct PendingOperation {
    slot: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl PendingOperation {
    fn attach(promise: &Promise) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let op = PendingOperation {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        let on_fulfilled = observer(op.slot.clone());
        let on_rejected = observer(op.slot);
        promise.then(
            move |value| on_fulfilled(Ok(value)),
            move |err| on_rejected(Err(err)),
        );
        rx
    }
}

/// Hand `outcome` to the waiter, or give it back if the slot was already
/// used.
fn deliver(slot: &Mutex<Option<oneshot::Sender<Outcome>>>, outcome: Outcome) -> Result<(), Outcome> {
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    match sender {
        // The waiter may have given up (its thread panicked); nothing to do.
        Some(sender) => {
            let _ = sender.send(outcome);
            Ok(())
        }
        None => Err(outcome),
    }
}

fn observer(slot: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>) -> impl FnOnce(Outcome) + Send {
    move |outcome| {
        if deliver(&slot, outcome).is_err() {
            // Observers run on the host thread, whose loop survives panics.
            error!("pending operation delivered twice: the host settled a promise more than once");
            std::process::abort();
        }
    }
}

/// Block the calling thread until `promise` settles.
///
/// A rejection becomes [`BridgeError::Host`]. If the host drops the
/// promise's resolver without settling it, returns
/// [`BridgeError::Abandoned`] instead of blocking forever.
///
/// # Panics
///
/// Panics when called on the host thread, where blocking would deadlock the
/// host.
pub fn wait(promise: &Promise) -> BridgeResult<HostValue> {
    assert!(
        !on_host_thread(),
        "deferred::wait called on the host thread; blocking here would deadlock"
    );
    let rx = PendingOperation::attach(promise);
    match rx.blocking_recv() {
        Ok(outcome) => outcome.map_err(BridgeError::Host),
        Err(_) => Err(BridgeError::Abandoned),
    }
}

/// Async flavour of [`wait`], for code already running on the task pool.
pub async fn settled(promise: &Promise) -> BridgeResult<HostValue> {
    let rx = PendingOperation::attach(promise);
    match rx.await {
        Ok(outcome) => outcome.map_err(BridgeError::Host),
        Err(_) => Err(BridgeError::Abandoned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use warpgrid_host_api::EventLoop;

    #[test]
    fn second_delivery_is_refused() {
        let (tx, mut rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));

        assert!(deliver(&slot, Ok(HostValue::from("first"))).is_ok());
        let refused = deliver(&slot, Err(HostError::new("second"))).unwrap_err();

        assert_eq!(refused.unwrap_err().to_string(), "Error: second");
        let delivered = rx.try_recv().unwrap().unwrap();
        assert_eq!(delivered.as_str(), Some("first"));
    }

    #[test]
    fn resolves_exactly_once() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let (promise, resolver) = Promise::pending(&host);

        let waiter = thread::spawn(move || wait(&promise));
        thread::sleep(Duration::from_millis(10));
        resolver.resolve("done");

        let value = waiter.join().unwrap().unwrap();
        assert_eq!(value.as_str(), Some("done"));
    }

    #[test]
    fn rejection_is_a_host_error() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let promise = Promise::rejected(&host, HostError::type_error("boom"));

        match wait(&promise) {
            Err(BridgeError::Host(err)) => {
                assert_eq!(err.name(), "TypeError");
                assert_eq!(err.message(), "boom");
            }
            other => panic!("expected host error, got {other:?}"),
        }
    }

    #[test]
    fn dropped_resolver_abandons_the_wait() {
        let event_loop = EventLoop::start().unwrap();
        let host = event_loop.handle();
        let (promise, resolver) = Promise::pending(&host);

        let waiter = thread::spawn(move || wait(&promise));
        thread::sleep(Duration::from_millis(10));
        drop(resolver);

        assert!(matches!(waiter.join().unwrap(), Err(BridgeError::Abandoned)));
    }
}
