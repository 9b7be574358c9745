//! Deferred result handles.
//!
//! A [`Promise`] settles exactly once, either fulfilled with a value or
//! rejected with a [`HostError`]. Observers registered with
//! [`Promise::then`] always run on the host thread, in registration order,
//! even when the promise was already settled at registration time.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::lock;
use crate::value::HostValue;

type Reaction = Box<dyn FnOnce(Result<HostValue, HostError>) + Send + 'static>;

enum State {
    Pending(Vec<Reaction>),
    /// Pending with no resolver left: observers are dropped on arrival.
    Abandoned,
    Fulfilled(HostValue),
    Rejected(HostError),
}

struct Shared {
    state: Mutex<State>,
    host: HostHandle,
}

/// A host deferred result handle.
#[derive(Clone)]
pub struct Promise {
    shared: Arc<Shared>,
}

/// The settling half of a pending [`Promise`].
///
/// Settling consumes the resolver. Dropping it unsettled abandons the
/// promise: it will never settle, and the observers already attached are
/// dropped without running.
pub struct Resolver {
    shared: Arc<Shared>,
}

impl Promise {
    /// Create a pending promise and its resolver.
    pub fn pending(host: &HostHandle) -> (Promise, Resolver) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending(Vec::new())),
            host: host.clone(),
        });
        (
            Promise {
                shared: shared.clone(),
            },
            Resolver { shared },
        )
    }

    pub fn resolved(host: &HostHandle, value: impl Into<HostValue>) -> Promise {
        Self::settled(host, State::Fulfilled(value.into()))
    }

    pub fn rejected(host: &HostHandle, error: HostError) -> Promise {
        Self::settled(host, State::Rejected(error))
    }

    fn settled(host: &HostHandle, state: State) -> Promise {
        Promise {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                host: host.clone(),
            }),
        }
    }

    /// Attach one fulfilment observer and one rejection observer.
    ///
    /// Exactly one of the two runs, once, on the host thread.
    pub fn then(
        &self,
        on_fulfilled: impl FnOnce(HostValue) + Send + 'static,
        on_rejected: impl FnOnce(HostError) + Send + 'static,
    ) {
        self.on_settle(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(error) => on_rejected(error),
        });
    }

    /// Attach a single observer that receives the settlement as a `Result`.
    pub fn on_settle(&self, observer: impl FnOnce(Result<HostValue, HostError>) + Send + 'static) {
        let reaction: Reaction = Box::new(observer);
        let outcome = match &mut *lock(&self.shared.state) {
            State::Pending(reactions) => {
                reactions.push(reaction);
                return;
            }
            // Never settles; the reaction is dropped after the lock.
            State::Abandoned => return,
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(error) => Err(error.clone()),
        };
        schedule(&self.shared.host, reaction, outcome);
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            *lock(&self.shared.state),
            State::Fulfilled(_) | State::Rejected(_)
        )
    }

    /// The host loop this promise schedules its observers on.
    pub fn host(&self) -> &HostHandle {
        &self.shared.host
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*lock(&self.shared.state) {
            State::Pending(_) | State::Abandoned => "pending",
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl Resolver {
    pub fn resolve(self, value: impl Into<HostValue>) {
        settle(&self.shared, Ok(value.into()));
    }

    pub fn reject(self, error: HostError) {
        settle(&self.shared, Err(error));
    }

    /// Settle from a `Result`.
    pub fn settle(self, outcome: Result<HostValue, HostError>) {
        settle(&self.shared, outcome);
    }

    /// Settle this promise the same way `source` settles.
    pub fn follow(self, source: &Promise) {
        source.on_settle(move |outcome| self.settle(outcome));
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        let orphaned = {
            let mut state = lock(&self.shared.state);
            if !matches!(*state, State::Pending(_)) {
                return;
            }
            match mem::replace(&mut *state, State::Abandoned) {
                State::Pending(reactions) => reactions,
                _ => Vec::new(),
            }
        };
        if !orphaned.is_empty() {
            debug!(observers = orphaned.len(), "resolver dropped unsettled");
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resolver")
    }
}

fn settle(shared: &Shared, outcome: Result<HostValue, HostError>) {
    let next = match &outcome {
        Ok(value) => State::Fulfilled(value.clone()),
        Err(error) => State::Rejected(error.clone()),
    };
    let reactions = {
        let mut state = lock(&shared.state);
        if !matches!(*state, State::Pending(_)) {
            debug!("ignoring settlement of an already settled promise");
            return;
        }
        match mem::replace(&mut *state, next) {
            State::Pending(reactions) => reactions,
            _ => Vec::new(),
        }
    };
    for reaction in reactions {
        schedule(&shared.host, reaction, outcome.clone());
    }
}

fn schedule(host: &HostHandle, reaction: Reaction, outcome: Result<HostValue, HostError>) {
    host.post(move || reaction(outcome));
}
