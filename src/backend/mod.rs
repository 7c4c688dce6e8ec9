//! Persistence backends.
//!
//! The version store talks to storage through two narrow traits:
//!
//! - [`ObjectBackend`]: write-once objects addressed by kind and hash
//!   (content payloads, commits, snapshot checkpoints)
//! - [`ReferenceBackend`]: the only mutable state, named references updated
//!   by atomic compare-and-swap
//!
//! Two implementations ship with the crate: [`MemoryBackend`] and
//! [`FsBackend`] (sharded object files plus a checksummed reference table).

mod fs;
mod memory;

pub use fs::FsBackend;
pub use memory::MemoryBackend;

use crate::error::{Result, StoreError};
use crate::types::{CommitId, Hash, Reference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Namespaces for immutable objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// Content payloads, keyed by the payload hash.
    Content,
    /// Canonical commit encodings, keyed by the commit id.
    Commit,
    /// Materialized snapshots, keyed by the encoding hash.
    Checkpoint,
    /// Commit id to checkpoint hash.
    CheckpointIndex,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Content,
        ObjectKind::Commit,
        ObjectKind::Checkpoint,
        ObjectKind::CheckpointIndex,
    ];

    /// Directory / tag name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Content => "content",
            ObjectKind::Commit => "commit",
            ObjectKind::Checkpoint => "checkpoint",
            ObjectKind::CheckpointIndex => "checkpoint-index",
        }
    }

    /// Whether the object key is the SHA-256 of the stored bytes.
    pub fn is_content_addressed(&self) -> bool {
        !matches!(self, ObjectKind::CheckpointIndex)
    }
}

/// Write-once object storage.
///
/// Implementations must tolerate concurrent writers of the same object:
/// writing identical bytes twice is a no-op.
pub trait ObjectBackend: Send + Sync {
    /// Store an object. Returns `true` if it was newly written.
    fn put_object(&self, kind: ObjectKind, key: &Hash, data: &[u8]) -> Result<bool>;

    /// Fetch an object, `None` if absent.
    fn get_object(&self, kind: ObjectKind, key: &Hash) -> Result<Option<Vec<u8>>>;

    /// Check whether an object exists.
    fn contains_object(&self, kind: ObjectKind, key: &Hash) -> Result<bool>;
}

/// Named references with optimistic concurrency.
pub trait ReferenceBackend: Send + Sync {
    fn get_reference(&self, name: &str) -> Result<Option<Reference>>;

    /// All references sorted by name.
    fn list_references(&self) -> Result<Vec<Reference>>;

    /// Insert a new reference; fails if the name is taken.
    fn create_reference(&self, reference: Reference) -> Result<()>;

    /// Atomically move `name` from `expected` to `new_head`.
    fn compare_and_swap(&self, name: &str, expected: CommitId, new_head: CommitId)
        -> Result<Reference>;

    /// Atomically remove `name` if it still points at `expected`.
    fn delete_reference(&self, name: &str, expected: CommitId) -> Result<Reference>;
}

/// In-memory reference table shared by both backends.
///
/// Callers provide the locking; every method here is a single atomic step
/// under that lock.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct RefTable {
    refs: BTreeMap<String, Reference>,
}

impl RefTable {
    pub(crate) fn get(&self, name: &str) -> Option<Reference> {
        self.refs.get(name).cloned()
    }

    pub(crate) fn list(&self) -> Vec<Reference> {
        self.refs.values().cloned().collect()
    }

    pub(crate) fn create(&mut self, reference: Reference) -> Result<()> {
        if self.refs.contains_key(&reference.name) {
            return Err(StoreError::ReferenceAlreadyExists(reference.name));
        }
        self.refs.insert(reference.name.clone(), reference);
        Ok(())
    }

    pub(crate) fn compare_and_swap(
        &mut self,
        name: &str,
        expected: CommitId,
        new_head: CommitId,
    ) -> Result<Reference> {
        let reference = self
            .refs
            .get_mut(name)
            .ok_or_else(|| StoreError::ReferenceNotFound(name.to_string()))?;

        if reference.head != expected {
            return Err(StoreError::ReferenceConflict {
                name: name.to_string(),
                expected,
                actual: reference.head,
            });
        }

        reference.head = new_head;
        Ok(reference.clone())
    }

    pub(crate) fn delete(&mut self, name: &str, expected: CommitId) -> Result<Reference> {
        let current = self
            .refs
            .get(name)
            .ok_or_else(|| StoreError::ReferenceNotFound(name.to_string()))?;

        if current.head != expected {
            return Err(StoreError::ReferenceConflict {
                name: name.to_string(),
                expected,
                actual: current.head,
            });
        }

        self.refs
            .remove(name)
            .ok_or_else(|| StoreError::ReferenceNotFound(name.to_string()))
    }
}
