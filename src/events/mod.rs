//! In-process notifications of reference updates.
//!
//! Every successful reference change (create, commit, merge, transplant,
//! assign, delete) is broadcast after its compare-and-swap lands. Events are
//! never emitted for failed or dry-run operations. The update and its publish
//! happen under one store-wide guard, so the events of a reference arrive in
//! the order its head moved: each event's `previous` is the `head` of the one
//! before it.
//!
//! Subscriptions support:
//! - Filtering by reference name and event kind
//! - Bounded buffers with slow-subscriber dropping
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(EventConfig {
//!     filter: EventFilter::references(vec!["main".to_string()]),
//!     ..Default::default()
//! });
//!
//! while let Ok(event) = handle.recv() {
//!     match event {
//!         ReferenceEvent::Committed { head, .. } => println!("main moved to {}", head),
//!         ReferenceEvent::Dropped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{
    DropReason, EventConfig, EventFilter, EventKind, ReferenceEvent, SubscriptionHandle,
    SubscriptionId,
};
