//! Event bus for broadcasting reference updates.

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::types::{DropReason, EventConfig, ReferenceEvent, SubscriptionHandle, SubscriptionId};

struct Subscriber {
    config: EventConfig,
    sender: Sender<ReferenceEvent>,
}

impl Subscriber {
    /// Returns false if the buffer is full or the receiver is gone.
    fn try_send(&self, event: ReferenceEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Fans reference events out to subscribers.
pub struct EventBus {
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
    default_buffer_size: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_buffer_size(EventConfig::default().buffer_size)
    }

    /// Bus whose `subscribe_default` uses `buffer_size`.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            default_buffer_size: buffer_size.max(1),
        }
    }

    /// Register a subscriber. Only events published afterwards are delivered.
    pub fn subscribe(&self, config: EventConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscribers
            .write()
            .insert(id, Subscriber { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Subscribe to everything with the bus's default buffer size.
    pub fn subscribe_default(&self) -> SubscriptionHandle {
        self.subscribe(EventConfig {
            buffer_size: self.default_buffer_size,
            ..Default::default()
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscribers.write().remove(&id) {
            let _ = sub.sender.try_send(ReferenceEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver `event` to every matching subscriber, dropping the slow ones.
    pub fn publish(&self, event: ReferenceEvent) {
        let mut overflowed = Vec::new();

        {
            let subs = self.subscribers.read();
            for (id, sub) in subs.iter() {
                if sub.config.filter.matches(&event) && !sub.try_send(event.clone()) {
                    overflowed.push(*id);
                }
            }
        }

        if overflowed.is_empty() {
            return;
        }

        let mut subs = self.subscribers.write();
        for id in overflowed {
            if let Some(sub) = subs.remove(&id) {
                debug!(subscription = id.0, "dropping slow subscriber");
                // usually fails too since the buffer is full
                let _ = sub.sender.try_send(ReferenceEvent::Dropped {
                    reason: DropReason::BufferOverflow,
                });
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
