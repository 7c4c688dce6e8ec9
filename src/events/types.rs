//! Event and subscription types.

use crate::types::{CommitId, ReferenceKind};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct EventConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: EventFilter,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: EventFilter::default(),
        }
    }
}

/// Filter criteria. `None` matches everything.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub references: Option<Vec<String>>,
    pub kinds: Option<Vec<EventKind>>,
}

impl EventFilter {
    /// Only events about these references.
    pub fn references(names: Vec<String>) -> Self {
        Self {
            references: Some(names),
            ..Default::default()
        }
    }

    /// Only events of these kinds.
    pub fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            ..Default::default()
        }
    }

    pub(crate) fn matches(&self, event: &ReferenceEvent) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        match (&self.references, event.reference()) {
            (Some(names), Some(name)) => names.iter().any(|n| n == name),
            _ => true,
        }
    }
}

/// Discriminant of [`ReferenceEvent`], for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ReferenceCreated,
    Committed,
    Merged,
    Transplanted,
    ReferenceAssigned,
    ReferenceDeleted,
    Dropped,
}

/// Events delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferenceEvent {
    ReferenceCreated {
        reference: String,
        kind: ReferenceKind,
        head: CommitId,
    },

    /// A commit landed on a branch.
    Committed {
        reference: String,
        previous: CommitId,
        head: CommitId,
        author: String,
        mutations: usize,
    },

    Merged {
        reference: String,
        previous: CommitId,
        head: CommitId,
        source: Option<CommitId>,
        commits: Vec<CommitId>,
    },

    Transplanted {
        reference: String,
        previous: CommitId,
        head: CommitId,
        commits: Vec<CommitId>,
    },

    /// A reference was explicitly repointed.
    ReferenceAssigned {
        reference: String,
        previous: CommitId,
        head: CommitId,
    },

    ReferenceDeleted {
        reference: String,
        head: CommitId,
    },

    /// Subscription was dropped; no further events follow.
    Dropped {
        reason: DropReason,
    },
}

impl ReferenceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ReferenceEvent::ReferenceCreated { .. } => EventKind::ReferenceCreated,
            ReferenceEvent::Committed { .. } => EventKind::Committed,
            ReferenceEvent::Merged { .. } => EventKind::Merged,
            ReferenceEvent::Transplanted { .. } => EventKind::Transplanted,
            ReferenceEvent::ReferenceAssigned { .. } => EventKind::ReferenceAssigned,
            ReferenceEvent::ReferenceDeleted { .. } => EventKind::ReferenceDeleted,
            ReferenceEvent::Dropped { .. } => EventKind::Dropped,
        }
    }

    /// Reference the event is about.
    pub fn reference(&self) -> Option<&str> {
        match self {
            ReferenceEvent::ReferenceCreated { reference, .. }
            | ReferenceEvent::Committed { reference, .. }
            | ReferenceEvent::Merged { reference, .. }
            | ReferenceEvent::Transplanted { reference, .. }
            | ReferenceEvent::ReferenceAssigned { reference, .. }
            | ReferenceEvent::ReferenceDeleted { reference, .. } => Some(reference),
            ReferenceEvent::Dropped { .. } => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<ReferenceEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ReferenceEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ReferenceEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ReferenceEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<ReferenceEvent> {
        self.receiver.try_iter().collect()
    }
}
