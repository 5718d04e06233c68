//! Typed publish/subscribe bus.
//!
//! Each [`Subscription`] owns an unbounded queue; publishing clones the event
//! into every live queue. Dropping a subscription (or calling
//! [`Subscription::unsubscribe`]) removes it from the bus.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tracing::trace;

struct Subscribers<T> {
    next_id: u64,
    senders: BTreeMap<u64, mpsc::UnboundedSender<T>>,
}

type Shared<T> = Arc<Mutex<Subscribers<T>>>;

fn lock<T>(shared: &Mutex<Subscribers<T>>) -> MutexGuard<'_, Subscribers<T>> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// A broadcast bus for events of type `T`.
pub struct EventBus<T> {
    inner: Shared<T>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                senders: BTreeMap::new(),
            })),
        }
    }

    /// Registers a new subscriber. Only events published afterwards are
    /// received.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = lock(&self.inner);
        subs.next_id += 1;
        let id = subs.next_id;
        subs.senders.insert(id, tx);
        trace!(id, "Subscribed");
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every subscriber and returns how many received it.
    pub fn publish(&self, event: T) -> usize {
        let mut subs = lock(&self.inner);
        subs.senders.retain(|_, tx| tx.send(event.clone()).is_ok());
        subs.senders.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).senders.len()
    }
}

/// A handle receiving events from an [`EventBus`].
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    bus: Weak<Mutex<Subscribers<T>>>,
}

impl<T> Subscription<T> {
    /// Waits for the next event. Returns `None` once the bus is gone and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stops receiving events.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            lock(&bus).senders.remove(&self.id);
            trace!(id = self.id, "Unsubscribed");
        }
    }
}
