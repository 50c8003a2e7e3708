//! In-process lifecycle event bus.
//!
//! Providers announce progress with [`LoadEvent::ProviderProgressed`]; the
//! load coordinator announces [`LoadEvent::StartLoad`] and
//! [`LoadEvent::FullLoadOver`]. Listeners are plain callbacks invoked on the
//! publishing thread, outside of the bus lock, so a listener may publish or
//! unsubscribe from inside its callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// Lifecycle events exchanged between providers, the coordinator and
/// external collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    /// Coordinator → providers: a load cycle begins.
    StartLoad { generation: u64 },

    /// Provider → coordinator: "I progressed, re-check me".
    ProviderProgressed { provider: String },

    /// Coordinator → everyone: every enabled provider has loaded.
    FullLoadOver { generation: u64 },
}

/// Callback type for event listeners.
pub type Listener = Arc<dyn Fn(&LoadEvent) + Send + Sync + 'static>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Listener {0:?} is not registered")]
    UnknownListener(ListenerId),
}

/// Cheaply cloneable event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for every event published from now on.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LoadEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Fails if it was never registered or already removed.
    pub fn unsubscribe(&self, id: ListenerId) -> Result<(), EventError> {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        if listeners.len() == before {
            return Err(EventError::UnknownListener(id));
        }
        Ok(())
    }

    /// Deliver an event to every listener registered at the time of the call.
    pub fn publish(&self, event: LoadEvent) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        tracing::trace!(?event, listeners = listeners.len(), "publishing event");
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(move |e| sink.lock().push(e.clone()));

        bus.publish(LoadEvent::StartLoad { generation: 1 });
        bus.publish(LoadEvent::ProviderProgressed {
            provider: "app".into(),
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], LoadEvent::StartLoad { generation: 1 });
    }

    #[test]
    fn test_unsubscribe_twice_fails() {
        let bus = EventBus::new();
        let id = bus.subscribe(|_| {});
        assert!(bus.unsubscribe(id).is_ok());
        assert_eq!(bus.unsubscribe(id), Err(EventError::UnknownListener(id)));
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let bus_clone = bus.clone();
        let slot_clone = Arc::clone(&slot);
        let calls_clone = Arc::clone(&calls);
        let id = bus.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = slot_clone.lock().take() {
                let _ = bus_clone.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        bus.publish(LoadEvent::FullLoadOver { generation: 0 });
        bus.publish(LoadEvent::FullLoadOver { generation: 0 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
