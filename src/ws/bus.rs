//! Event Bus
//!
//! Ordered multicast registries for the two logical channels a connection
//! publishes on: readiness changes and inbound envelopes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use crate::ws::envelope::{Envelope, STATE_EVENT, StateData};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    entries: Vec<(u64, Callback<T>)>,
    retained: Option<T>,
}

/// Listener list for one channel.
///
/// Dispatch iterates over a snapshot taken when it starts, so a callback may
/// subscribe or unsubscribe anyone (itself included) without disturbing the
/// pass in progress.
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> Listeners<T> {
    /// A channel that keeps nothing between dispatches.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A channel that remembers the last dispatched value, starting at `initial`.
    pub fn retaining(initial: T) -> Self {
        Self::build(Some(initial))
    }

    fn build(retained: Option<T>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                entries: Vec::new(),
                retained,
            })),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a listener.
    ///
    /// With `call_immediately`, a retaining channel invokes the callback once,
    /// synchronously, with its current value. Non-retaining channels have
    /// nothing to replay and skip the call.
    pub fn subscribe<F>(&self, callback: F, call_immediately: bool) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let callback: Callback<T> = Arc::new(callback);

        let current = {
            let mut registry = lock(&self.registry);
            registry.entries.push((id, callback.clone()));
            registry.retained.clone()
        };

        if call_immediately {
            if let Some(value) = current {
                callback(&value);
            }
        }

        let registry = Arc::downgrade(&self.registry);
        Subscription {
            remove: Arc::new(move || remove_entry(&registry, id)),
        }
    }

    /// Invoke every listener registered at the time of the call, in order.
    pub fn dispatch(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = {
            let mut registry = lock(&self.registry);
            if registry.retained.is_some() {
                registry.retained = Some(value.clone());
            }
            registry.entries.iter().map(|(_, cb)| cb.clone()).collect()
        };

        for callback in snapshot {
            callback(value);
        }
    }

    /// Last dispatched value of a retaining channel.
    pub fn current(&self) -> Option<T> {
        lock(&self.registry).retained.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(registry: &Mutex<Registry<T>>) -> std::sync::MutexGuard<'_, Registry<T>> {
    // A panicking listener runs outside the lock, so poisoning only means a
    // previous holder panicked mid-push; the list itself is still consistent.
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn remove_entry<T>(registry: &Weak<Mutex<Registry<T>>>, id: u64) {
    if let Some(registry) = registry.upgrade() {
        lock(&registry).entries.retain(|(entry, _)| *entry != id);
    }
}

/// Handle returned by every subscribe call.
///
/// Dropping it does not unsubscribe: listeners belong to whoever registered
/// them and stay until `unsubscribe` is called.
#[derive(Clone)]
#[must_use = "dropping a Subscription leaves the listener registered forever"]
pub struct Subscription {
    remove: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    /// Remove exactly the listener this handle was returned for. Calling it
    /// again is a no-op.
    pub fn unsubscribe(&self) {
        (self.remove)();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// The two channels published by a connection.
pub struct EventBus {
    connection_change: Listeners<bool>,
    message: Listeners<Envelope>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            connection_change: Listeners::retaining(false),
            message: Listeners::new(),
        }
    }

    /// Listen for readiness changes. With `call_immediately` the callback is
    /// invoked right away with the current readiness.
    pub fn on_connection_change<F>(&self, callback: F, call_immediately: bool) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.connection_change
            .subscribe(move |open: &bool| callback(*open), call_immediately)
    }

    /// Listen for every inbound envelope.
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.message.subscribe(callback, false)
    }

    /// Listen for one event name; the callback receives only `data`.
    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let event = event.into();
        self.on_message(move |envelope| {
            if envelope.event() == event {
                callback(envelope.data());
            }
        })
    }

    /// Typed listener for `state` reports. Payloads that do not match
    /// [`StateData`] are logged and skipped.
    pub fn on_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(StateData) + Send + Sync + 'static,
    {
        self.on(STATE_EVENT, move |data| {
            match serde_json::from_value::<StateData>(data.clone()) {
                Ok(state) => callback(state),
                Err(e) => log::error!("[WS] Malformed state payload {}: {}", data, e),
            }
        })
    }

    pub fn dispatch_connection_change(&self, open: bool) {
        self.connection_change.dispatch(&open);
    }

    pub fn dispatch_message(&self, envelope: &Envelope) {
        self.message.dispatch(envelope);
    }

    /// Readiness as last published.
    pub fn is_ready(&self) -> bool {
        self.connection_change.current().unwrap_or(false)
    }

    pub fn connection_listeners(&self) -> usize {
        self.connection_change.len()
    }

    pub fn message_listeners(&self) -> usize {
        self.message.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
