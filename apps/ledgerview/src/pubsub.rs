//! Explicit publish-subscribe registry used across the client.
//!
//! Listeners are registered with a handle and removed deterministically at
//! owner-lifetime end; there are no weak or garbage-collected listeners.

use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by [`Subscribers::subscribe`]; passing it back to
/// [`Subscribers::unsubscribe`] removes exactly that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next: u64,
    listeners: Vec<(Subscription, Callback<E>)>,
}

/// Listener registry delivering events in registration order.
pub struct Subscribers<E> {
    inner: Mutex<Registry<E>>,
}

impl<E> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registry {
                next: 1,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, listener: Box<dyn Fn(&E) + Send + Sync>) -> Subscription {
        let mut inner = self.inner.lock();
        let handle = Subscription(inner.next);
        inner.next += 1;
        inner.listeners.push((handle, Arc::from(listener)));
        handle
    }

    /// Returns false when the handle was already removed.
    pub fn unsubscribe(&self, handle: Subscription) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(h, _)| *h != handle);
        inner.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener with `event`. Callbacks run outside the registry
    /// lock so a listener may subscribe or unsubscribe reentrantly.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Callback<E>> = {
            let inner = self.inner.lock();
            inner.listeners.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}
