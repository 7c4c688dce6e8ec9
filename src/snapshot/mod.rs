//! Namespace snapshots with checkpointed chains.
//!
//! The key→content mapping at a commit is never stored per commit. It is
//! rebuilt by walking the parent chain back to the nearest checkpoint and
//! replaying the mutations in between, so reconstruction is O(k) where k is
//! the checkpoint interval, regardless of history length.

mod overlay;
mod resolver;

pub use overlay::{apply_mutations, Snapshot};
pub use resolver::SnapshotResolver;
