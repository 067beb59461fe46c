//! Typed in-process pub/sub with per-subscriber bounded queues.
//!
//! Subscribers register per event type and get their own bounded channel.
//! Publishing never blocks: a subscriber whose queue is full loses that
//! event (at-most-once delivery) and the drop is counted. Per-subscriber
//! ordering is FIFO; nothing is guaranteed across subscribers.
//!
//! # Example
//!
//! ```
//! use docbuild::bus::EventBus;
//! use docbuild::events::BuildRequested;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new();
//! let (mut rx, _sub) = bus.subscribe::<BuildRequested>(16).expect("subscribe");
//!
//! bus.publish(BuildRequested::with_reason("manual")).expect("publish");
//! let evt = rx.recv().await.expect("event");
//! assert_eq!(evt.reason, "manual");
//! # }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

/// Errors surfaced by bus operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    /// The bus was closed; no further publishes or subscribes.
    #[error("event bus is closed")]
    Closed,
}

/// Delivery accounting for a single publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Subscribers that received the event.
    pub delivered: usize,
    /// Subscribers whose queue was full; the event was dropped for them.
    pub dropped: usize,
}

struct SubscriberEntry {
    id: u64,
    /// Boxed `mpsc::Sender<T>` for the topic's event type.
    sender: Box<dyn Any + Send>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
struct BusInner {
    closed: bool,
    next_id: u64,
    dropped_total: u64,
    topics: HashMap<TypeId, Vec<SubscriberEntry>>,
}

/// Typed publish/subscribe hub for orchestration events.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of type `T` with a bounded queue of `capacity`.
    ///
    /// Returns the receiver and a guard; dropping the guard unsubscribes
    /// and closes the channel. Capacity zero is bumped to one.
    pub fn subscribe<T: Clone + Send + 'static>(
        &self,
        capacity: usize,
    ) -> Result<(mpsc::Receiver<T>, Subscription), BusError> {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        if inner.closed {
            return Err(BusError::Closed);
        }

        let (tx, rx) = mpsc::channel::<T>(capacity.max(1));
        let id = inner.next_id;
        inner.next_id += 1;
        let dropped = Arc::new(AtomicU64::new(0));

        inner
            .topics
            .entry(TypeId::of::<T>())
            .or_default()
            .push(SubscriberEntry {
                id,
                sender: Box::new(tx),
                dropped: dropped.clone(),
            });

        let subscription = Subscription {
            bus: Arc::downgrade(&self.inner),
            type_id: TypeId::of::<T>(),
            id,
            dropped,
        };
        Ok((rx, subscription))
    }

    /// Publish an event to every current subscriber of its type.
    ///
    /// Non-blocking: a full subscriber queue drops the event for that
    /// subscriber and increments its drop counter. Subscribers whose
    /// receiver has gone away are pruned.
    pub fn publish<T: Clone + Send + 'static>(&self, event: T) -> Result<PublishReceipt, BusError> {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        if inner.closed {
            return Err(BusError::Closed);
        }

        let mut receipt = PublishReceipt::default();
        let mut newly_dropped = 0u64;
        if let Some(entries) = inner.topics.get_mut(&TypeId::of::<T>()) {
            entries.retain(|entry| {
                let Some(sender) = entry.sender.downcast_ref::<mpsc::Sender<T>>() else {
                    return false;
                };
                match sender.try_send(event.clone()) {
                    Ok(()) => {
                        receipt.delivered += 1;
                        true
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        receipt.dropped += 1;
                        newly_dropped += 1;
                        entry.dropped.fetch_add(1, Ordering::Relaxed);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
        }
        inner.dropped_total += newly_dropped;
        Ok(receipt)
    }

    /// Total events dropped across all subscribers since construction.
    pub fn dropped_total(&self) -> u64 {
        self.inner.lock().expect("bus lock poisoned").dropped_total
    }

    /// Current subscriber count across all topics.
    pub fn subscriber_count(&self) -> usize {
        let inner = self.inner.lock().expect("bus lock poisoned");
        inner.topics.values().map(Vec::len).sum()
    }

    /// Close the bus: all subscriber channels close, and further
    /// publishes or subscribes fail with [`BusError::Closed`].
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.closed = true;
        inner.topics.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("bus lock poisoned").closed
    }
}

/// Subscription guard. Dropping it removes the subscriber and closes its
/// channel. Also exposes the subscriber's drop counter.
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    type_id: TypeId,
    id: u64,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Events dropped for this subscriber because its queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Explicit unsubscribe; equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut inner = inner.lock().expect("bus lock poisoned");
        let now_empty = match inner.topics.get_mut(&self.type_id) {
            Some(entries) => {
                entries.retain(|e| e.id != self.id);
                entries.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.topics.remove(&self.type_id);
        }
    }
}
