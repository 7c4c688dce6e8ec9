//! Snapshot resolution over the commit chain.

use super::overlay::{apply_mutations, Snapshot};
use crate::backend::{ObjectBackend, ObjectKind};
use crate::commits::CommitStore;
use crate::error::{Result, StoreError};
use crate::types::{Commit, CommitId, ContentEntry, ContentKey, Hash};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, trace};

/// Builds snapshots from commit chains and maintains checkpoints.
///
/// Every commit whose depth is a non-zero multiple of `checkpoint_interval`
/// gets its full snapshot persisted once it has been resolved. Checkpoint
/// payloads are content-addressed, so commits with identical accumulated state
/// share one stored snapshot.
pub struct SnapshotResolver {
    commits: Arc<CommitStore>,
    backend: Arc<dyn ObjectBackend>,
    checkpoint_interval: u64,
    cache: Mutex<LruCache<CommitId, Snapshot>>,
}

impl SnapshotResolver {
    pub fn new(
        commits: Arc<CommitStore>,
        backend: Arc<dyn ObjectBackend>,
        checkpoint_interval: u64,
        cache_size: usize,
    ) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            commits,
            backend,
            checkpoint_interval,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Whether commits at `depth` carry a checkpoint.
    pub fn is_checkpoint_depth(&self, depth: u64) -> bool {
        self.checkpoint_interval > 0 && depth > 0 && depth % self.checkpoint_interval == 0
    }

    /// Full key→content mapping at `commit`.
    pub fn resolve(&self, commit: &CommitId) -> Result<Snapshot> {
        if let Some(snapshot) = self.cache.lock().get(commit).cloned() {
            return Ok(snapshot);
        }

        // Newest first; checkpoint-depth commits in here have no stored checkpoint.
        let mut pending: Vec<Arc<Commit>> = Vec::new();
        let mut base: Option<Snapshot> = None;

        for c in self.commits.parent_chain(*commit) {
            let c = c?;
            if self.is_checkpoint_depth(c.depth) {
                if let Some(checkpoint) = self.load_checkpoint(&c.id)? {
                    base = Some(checkpoint);
                    break;
                }
            }
            pending.push(c);
        }

        if pending.is_empty() {
            if let Some(base) = base {
                return Ok(base);
            }
        }

        trace!(
            commit = %commit,
            walked = pending.len(),
            from_checkpoint = base.is_some(),
            "resolving snapshot"
        );

        let mut entries = base
            .map(|snapshot| snapshot.entries().clone())
            .unwrap_or_default();

        for c in pending.iter().rev() {
            apply_mutations(&mut entries, &c.mutations);
            if self.is_checkpoint_depth(c.depth) {
                self.store_checkpoint(&c.id, &entries)?;
            }
        }

        let snapshot = Snapshot::new(*commit, entries);
        self.cache.lock().put(*commit, snapshot.clone());
        Ok(snapshot)
    }

    /// Entries for `keys` at `commit`; absent keys are missing from the result.
    ///
    /// Walks only as far as needed: stops once every key has been decided,
    /// at the first checkpoint, or at the root.
    pub fn lookup(
        &self,
        commit: &CommitId,
        keys: &[ContentKey],
    ) -> Result<BTreeMap<ContentKey, ContentEntry>> {
        if let Some(snapshot) = self.cache.lock().get(commit).cloned() {
            return Ok(Self::pick(&snapshot, keys.iter()));
        }

        let mut remaining: BTreeSet<&ContentKey> = keys.iter().collect();
        let mut found = BTreeMap::new();

        for c in self.commits.parent_chain(*commit) {
            if remaining.is_empty() {
                break;
            }
            let c = c?;

            if self.is_checkpoint_depth(c.depth) {
                if let Some(checkpoint) = self.load_checkpoint(&c.id)? {
                    found.extend(Self::pick(&checkpoint, remaining.iter().copied()));
                    break;
                }
            }

            // Newest mutation of a key within the commit decides it.
            for mutation in c.mutations.iter().rev() {
                if remaining.remove(mutation.key()) {
                    if let Some(entry) = mutation.entry() {
                        found.insert(mutation.key().clone(), entry);
                    }
                }
            }
        }

        Ok(found)
    }

    /// Entry for a single key at `commit`.
    pub fn get(&self, commit: &CommitId, key: &ContentKey) -> Result<Option<ContentEntry>> {
        let mut found = self.lookup(commit, std::slice::from_ref(key))?;
        Ok(found.remove(key))
    }

    fn pick<'a>(
        snapshot: &Snapshot,
        keys: impl Iterator<Item = &'a ContentKey>,
    ) -> BTreeMap<ContentKey, ContentEntry> {
        keys.filter_map(|key| snapshot.get(key).map(|entry| (key.clone(), entry.clone())))
            .collect()
    }

    fn load_checkpoint(&self, commit: &CommitId) -> Result<Option<Snapshot>> {
        if let Some(snapshot) = self.cache.lock().get(commit).cloned() {
            return Ok(Some(snapshot));
        }

        let pointer = match self
            .backend
            .get_object(ObjectKind::CheckpointIndex, &commit.0)?
        {
            Some(pointer) => pointer,
            None => return Ok(None),
        };
        let snapshot_hash = Hash(pointer.as_slice().try_into().map_err(|_| {
            StoreError::InvalidFormat(format!("checkpoint index for {} is malformed", commit))
        })?);

        let encoded = self
            .backend
            .get_object(ObjectKind::Checkpoint, &snapshot_hash)?
            .ok_or_else(|| {
                StoreError::Corruption(format!(
                    "checkpoint {} for commit {} is missing",
                    snapshot_hash, commit
                ))
            })?;

        let pairs: Vec<(ContentKey, ContentEntry)> = rmp_serde::from_slice(&encoded)?;
        let snapshot = Snapshot::new(*commit, pairs.into_iter().collect());
        self.cache.lock().put(*commit, snapshot.clone());
        Ok(Some(snapshot))
    }

    fn store_checkpoint(
        &self,
        commit: &CommitId,
        entries: &BTreeMap<ContentKey, ContentEntry>,
    ) -> Result<()> {
        let pairs: Vec<(&ContentKey, &ContentEntry)> = entries.iter().collect();
        let encoded = rmp_serde::to_vec(&pairs)?;
        let snapshot_hash = Hash::from_bytes(&encoded);

        // Snapshot first, then the pointer, so a visible pointer never dangles.
        self.backend
            .put_object(ObjectKind::Checkpoint, &snapshot_hash, &encoded)?;
        self.backend
            .put_object(ObjectKind::CheckpointIndex, &commit.0, &snapshot_hash.0)?;

        debug!(commit = %commit, keys = entries.len(), checkpoint = %snapshot_hash, "stored checkpoint");
        Ok(())
    }

    /// Whether a checkpoint is stored for `commit`.
    pub fn has_checkpoint(&self, commit: &CommitId) -> Result<bool> {
        self.backend.contains_object(ObjectKind::CheckpointIndex, &commit.0)
    }

    /// Drop cached snapshots (checkpoints stay persisted).
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}
