//! Listener registry shared by the auth state store and the token event bus.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: Vec<(u64, Listener<E>)>,
}

/// Ordered set of callbacks. Listeners run in subscription order.
pub(crate) struct ListenerRegistry<E> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for ListenerRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: 'static> ListenerRegistry<E> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub(crate) fn add<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.inner.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(listener)));
            id
        };

        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().listeners.retain(|(existing, _)| *existing != id);
            }
        })
    }

    /// Call every listener with `event`.
    ///
    /// The listener list is copied first, so listeners may subscribe or
    /// unsubscribe while being notified.
    pub(crate) fn notify(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .inner
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Handle returned by every `subscribe` call.
///
/// Dropping it unsubscribes. [`unsubscribe`](Self::unsubscribe) may be called
/// any number of times; only the first call has an effect.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    dispose: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            dispose: Mutex::new(Some(Box::new(dispose))),
        }
    }

    pub fn unsubscribe(&self) {
        let dispose = self.dispose.lock().take();
        if let Some(dispose) = dispose {
            dispose();
        }
    }

    pub fn is_active(&self) -> bool {
        self.dispose.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listeners_run_in_subscription_order() {
        let registry = ListenerRegistry::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|n| {
                let seen = seen.clone();
                registry.add(move |event: &u32| seen.lock().push((n, *event)))
            })
            .collect();

        registry.notify(&7);

        assert_eq!(*seen.lock(), vec![(0, 7), (1, 7), (2, 7)]);
        drop(subs);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = ListenerRegistry::<()>::new();
        let sub = registry.add(|_| {});
        let other = registry.add(|_| {});
        assert_eq!(registry.len(), 2);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(registry.len(), 1);
        drop(sub);
        assert_eq!(registry.len(), 1);

        drop(other);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = ListenerRegistry::<()>::new();
        let sub = registry.add(|_| {});
        drop(registry);
        sub.unsubscribe();
    }

    #[test]
    fn test_listener_can_unsubscribe_itself_during_notify() {
        let registry = ListenerRegistry::<()>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let sub = {
            let slot = slot.clone();
            let calls = calls.clone();
            registry.add(move |_| {
                *calls.lock() += 1;
                if let Some(sub) = slot.lock().take() {
                    sub.unsubscribe();
                }
            })
        };
        *slot.lock() = Some(sub);

        registry.notify(&());
        registry.notify(&());

        assert_eq!(*calls.lock(), 1);
        assert_eq!(registry.len(), 0);
    }
}
