//! External message observers.
//!
//! Observers see every well-formed inbound frame, in registration order,
//! before it is dispatched. A panicking observer is logged and skipped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Callback invoked with each raw inbound frame.
pub type Observer = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(u64, Observer)>,
}

/// Open set of frame observers. Clones share the same set.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<Mutex<Registry>>,
}

/// Handle returned by [`ObserverRegistry::register`].
///
/// Dropping it keeps the observer registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
#[must_use = "dropping the subscription makes the observer permanent"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the observer. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.observers.len();
        registry.observers.retain(|(id, _)| *id != self.id);
        registry.observers.len() != before
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.observers.push((id, Arc::new(observer)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every observer with `frame`.
    ///
    /// The set is snapshotted first, so observers may register or
    /// unsubscribe from inside the callback.
    pub fn notify(&self, frame: &serde_json::Value) {
        let observers: Vec<(u64, Observer)> = self.lock().observers.clone();

        for (id, observer) in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(frame))).is_err() {
                tracing::error!(observer_id = id, "Message observer panicked");
            }
        }
    }
}
