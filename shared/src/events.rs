//! Typed status event stream
//!
//! [`StatusBus`] fans every emitted event out to all current subscribers.
//! Each subscriber owns an unbounded channel, so a live subscriber never
//! misses an event and always sees events in emission order. Dropping the
//! [`Subscription`] or calling [`StatusBus::unsubscribe`] ends delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Handle identifying one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving side of a subscription
#[derive(Debug)]
pub struct Subscription<E> {
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Wait for the next event; `None` once unsubscribed or the bus is gone
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything queued so far
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

struct BusInner<E> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, mpsc::UnboundedSender<E>)>>,
}

/// Multi-subscriber event stream; cheap to clone
pub struct StatusBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for StatusBus<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Clone + Send + 'static> Default for StatusBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> StatusBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a subscriber that receives every event emitted from now on
    pub fn subscribe(&self) -> Subscription<E> {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push((id, tx));
        Subscription { id, receiver: rx }
    }

    /// Stop delivering to `id`; returns whether it was subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    /// Deliver `event` to every subscriber, pruning closed ones
    pub fn emit(&self, event: E) {
        self.subscribers()
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, mpsc::UnboundedSender<E>)>> {
        self.inner.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
