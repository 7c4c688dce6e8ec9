//! Merge and transplant of commits between references.
//!
//! Both operations replay source changes onto the head of a target branch.
//! For every touched key the engine compares three values (common base,
//! source, target) and either applies the source value, skips the key, or
//! reports a [`Conflict`]. The result becomes visible through one
//! compare-and-swap of the target branch; a lost race means the whole merge
//! must be recomputed by the caller.

mod engine;

pub use engine::MergeEngine;

use crate::types::{CommitId, CommitMeta, ContentEntry, ContentKey};

/// How source commits are written onto the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergeMode {
    /// One new commit carrying the net change.
    #[default]
    Squash,
    /// One new commit per source commit, keeping its metadata.
    Replay,
}

/// What to do when conflicts are found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail with [`crate::StoreError::MergeConflict`] and write nothing.
    #[default]
    Abort,
    /// Apply the non-conflicting keys and report the conflicts.
    Partial,
}

/// Why a key could not be merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Added on both sides with different content.
    KeyExists,
    /// Deleted on one side, modified on the other.
    KeyDeleted,
    /// Modified differently on both sides.
    ValueDiffers,
}

/// A key changed independently on both sides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub key: ContentKey,
    pub kind: ConflictKind,
    /// Value at the common base.
    pub base: Option<ContentEntry>,
    /// Value the source wants.
    pub source: Option<ContentEntry>,
    /// Value currently on the target.
    pub target: Option<ContentEntry>,
}

/// Merge/transplant options.
#[derive(Clone, Debug, Default)]
pub struct MergeOptions {
    pub mode: MergeMode,
    pub conflict_policy: ConflictPolicy,
    /// Compute the outcome without writing anything.
    pub dry_run: bool,
    /// Metadata for the squash commit; a default message is used if absent.
    pub meta: Option<CommitMeta>,
    /// Fail with a reference conflict unless the target is at this commit.
    pub expected_target: Option<CommitId>,
}

impl MergeOptions {
    pub fn mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn meta(mut self, meta: CommitMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn expected_target(mut self, head: CommitId) -> Self {
        self.expected_target = Some(head);
        self
    }
}

/// Outcome of a merge or transplant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeResult {
    pub target_branch: String,
    /// Target head the merge was computed against.
    pub expected_head: CommitId,
    /// Target head afterwards (unchanged unless `was_applied`).
    pub resulting_head: CommitId,
    pub source_head: Option<CommitId>,
    pub common_ancestor: Option<CommitId>,
    /// Commits written onto the target, oldest first.
    pub created_commits: Vec<CommitId>,
    /// Keys whose source value was applied.
    pub applied_keys: Vec<ContentKey>,
    pub conflicts: Vec<Conflict>,
    /// Whether the target reference was moved.
    pub was_applied: bool,
}

impl MergeResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}
