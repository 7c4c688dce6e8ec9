//! Snapshot values and mutation replay.

use crate::types::{CommitId, ContentEntry, ContentKey, Mutation};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Apply one commit's mutations to a mapping, in commit order.
///
/// A later mutation of the same key within the list overrides an earlier one;
/// `Delete` removes the key.
pub fn apply_mutations(entries: &mut BTreeMap<ContentKey, ContentEntry>, mutations: &[Mutation]) {
    for mutation in mutations {
        match mutation {
            Mutation::Put {
                key,
                content_id,
                content_hash,
            } => {
                entries.insert(
                    key.clone(),
                    ContentEntry {
                        id: content_id.clone(),
                        hash: *content_hash,
                    },
                );
            }
            Mutation::Delete { key } => {
                entries.remove(key);
            }
        }
    }
}

/// Immutable key→content mapping visible at one commit.
///
/// Cheap to clone; entries are shared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    commit: CommitId,
    entries: Arc<BTreeMap<ContentKey, ContentEntry>>,
}

impl Snapshot {
    pub fn new(commit: CommitId, entries: BTreeMap<ContentKey, ContentEntry>) -> Self {
        Self {
            commit,
            entries: Arc::new(entries),
        }
    }

    /// Commit this snapshot was resolved at.
    pub fn commit(&self) -> CommitId {
        self.commit
    }

    pub fn get(&self, key: &ContentKey) -> Option<&ContentEntry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &ContentKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&ContentKey, &ContentEntry)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ContentKey> {
        self.entries.keys()
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a ContentKey,
    ) -> impl Iterator<Item = (&'a ContentKey, &'a ContentEntry)> + 'a {
        self.entries
            .range((Bound::Included(prefix.clone()), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
    }

    pub fn entries(&self) -> &BTreeMap<ContentKey, ContentEntry> {
        &self.entries
    }
}
