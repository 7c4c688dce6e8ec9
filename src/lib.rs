//! # Reference Store
//!
//! A Git-like versioned metadata store: named branches and tags point into
//! an immutable commit history, and every commit captures a key→content
//! namespace that can be read, diffed and merged.
//!
//! ## Core Concepts
//!
//! - **Contents**: Immutable, content-addressed payloads
//! - **Commits**: Immutable key mutations chained to a parent commit
//! - **Snapshots**: The full namespace at a commit, rebuilt from checkpoints
//! - **References**: The only mutable state, moved by compare-and-swap
//!
//! ## Example
//!
//! ```ignore
//! use refstore::{CommitMeta, Operation, StoreConfig, VersionStore};
//!
//! let store = VersionStore::open(StoreConfig::at("./my-store"))?;
//!
//! let head = store.get_reference("main")?.head;
//! store.commit(
//!     "main",
//!     head,
//!     vec![Operation::put("db.orders", br#"{"schema":1}"#.to_vec())],
//!     CommitMeta::new("alice", "add orders table"),
//! )?;
//!
//! let orders = store.get_value("main", &"db.orders".into())?;
//! ```

pub mod authz;
pub mod backend;
pub mod commits;
pub mod contents;
pub mod diff;
pub mod error;
pub mod events;
pub mod merge;
pub mod refs;
pub mod snapshot;
pub mod store;
pub mod types;

// Re-exports
pub use authz::{AccessDecision, Action, AllowAll, Authorizer, Principal, Role, RoleAuthorizer, Session};
pub use backend::{FsBackend, MemoryBackend, ObjectBackend, ObjectKind, ReferenceBackend};
pub use commits::CommitStore;
pub use contents::ContentStore;
pub use diff::{DiffEntry, DiffKind, DiffOptions};
pub use error::{Result, StoreError};
pub use events::{
    DropReason, EventConfig, EventFilter, EventKind, ReferenceEvent, SubscriptionHandle,
    SubscriptionId,
};
pub use merge::{Conflict, ConflictKind, ConflictPolicy, MergeMode, MergeOptions, MergeResult};
pub use refs::{ReferenceManager, DEFAULT_BRANCH};
pub use snapshot::{Snapshot, SnapshotResolver};
pub use store::{StoreConfig, VersionStore};
pub use types::*;
