//! Typed listener registries.
//!
//! Each component's public events are a fixed set of [`ListenerSet`]s.
//! Listeners run in FIFO order of registration; [`subscribe`]
//! (`ListenerSet::subscribe`) returns a [`Subscription`] disposer that
//! removes the listener when explicitly disposed. Dropping a
//! `Subscription` without disposing it leaves the listener registered for
//! the lifetime of the set.

use std::sync::{Arc, Mutex, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A set of listeners for one event.
pub struct ListenerSet<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers a listener; returns a disposer.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription
    where
        T: 'static,
    {
        let id = {
            let mut registry = self.inner.lock().expect("listener registry poisoned");
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut registry = inner.lock().expect("listener registry poisoned");
                    registry.entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Invokes every listener with `value`, in registration order.
    pub(crate) fn emit(&self, value: &T) {
        // Snapshot the callbacks out of the lock so a listener can
        // subscribe or dispose without deadlocking.
        let callbacks: Vec<Callback<T>> = {
            let registry = self.inner.lock().expect("listener registry poisoned");
            registry.entries.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in callbacks {
            callback(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().expect("listener registry poisoned").entries.len()
    }
}

impl<T> Clone for ListenerSet<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .inner
            .lock()
            .map(|registry| registry.entries.len())
            .unwrap_or(0);
        f.debug_struct("ListenerSet").field("count", &count).finish()
    }
}

/// Disposer handle returned by [`ListenerSet::subscribe`].
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Removes the listener from its set.
    pub fn dispose(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
