//! Merge/transplant engine implementation.

use super::{Conflict, ConflictKind, ConflictPolicy, MergeMode, MergeOptions, MergeResult};
use crate::commits::CommitStore;
use crate::error::{Result, StoreError};
use crate::events::{EventBus, ReferenceEvent};
use crate::refs::ReferenceManager;
use crate::snapshot::SnapshotResolver;
use crate::types::{Commit, CommitId, CommitMeta, ContentEntry, ContentKey, Mutation, Reference, ReferenceKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-key verdict of a three-way comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decision {
    Apply,
    Skip,
    Conflict(ConflictKind),
}

/// Compare base, source and target values of one key.
fn decide(
    base: Option<&ContentEntry>,
    source: Option<&ContentEntry>,
    target: Option<&ContentEntry>,
) -> Decision {
    if source == base {
        // source ended where it started
        Decision::Skip
    } else if target == base {
        Decision::Apply
    } else if target == source {
        // both sides made the same change
        Decision::Skip
    } else if base.is_none() {
        Decision::Conflict(ConflictKind::KeyExists)
    } else if source.is_none() || target.is_none() {
        Decision::Conflict(ConflictKind::KeyDeleted)
    } else {
        Decision::Conflict(ConflictKind::ValueDiffers)
    }
}

/// Commits to write: metadata plus mutations, oldest first.
type Plan = Vec<(CommitMeta, Vec<Mutation>)>;

/// Applies commits from one history onto a branch.
pub struct MergeEngine {
    commits: Arc<CommitStore>,
    resolver: Arc<SnapshotResolver>,
    refs: Arc<ReferenceManager>,
    events: Arc<EventBus>,
}

impl MergeEngine {
    pub fn new(
        commits: Arc<CommitStore>,
        resolver: Arc<SnapshotResolver>,
        refs: Arc<ReferenceManager>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            commits,
            resolver,
            refs,
            events,
        }
    }

    /// Merge everything reachable from `source` since the common ancestor
    /// into `target_branch`.
    pub fn merge(
        &self,
        source: CommitId,
        target_branch: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        let target = self.target_branch(target_branch, options)?;
        let head = target.head;

        if self.commits.is_ancestor(&source, &head)? {
            debug!(%source, target = target_branch, "source already contained in target");
            return Ok(MergeResult {
                target_branch: target.name,
                expected_head: head,
                resulting_head: head,
                source_head: Some(source),
                common_ancestor: Some(source),
                created_commits: Vec::new(),
                applied_keys: Vec::new(),
                conflicts: Vec::new(),
                was_applied: false,
            });
        }

        let base = self.commits.merge_base(&source, &head)?;
        let source_commits = self.commits.commits_between(&base, &source)?;

        let touched: Vec<ContentKey> = source_commits
            .iter()
            .flat_map(|c| c.mutations.iter().map(|m| m.key().clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let base_values = self.resolver.lookup(&base, &touched)?;
        let source_values = self.resolver.lookup(&source, &touched)?;
        let target_values = self.resolver.lookup(&head, &touched)?;

        let mut applied: Vec<(ContentKey, Option<ContentEntry>)> = Vec::new();
        let mut conflicts = Vec::new();

        for key in touched {
            let b = base_values.get(&key);
            let s = source_values.get(&key);
            let t = target_values.get(&key);
            match decide(b, s, t) {
                Decision::Apply => applied.push((key, s.cloned())),
                Decision::Skip => {}
                Decision::Conflict(kind) => conflicts.push(Conflict {
                    base: b.cloned(),
                    source: s.cloned(),
                    target: t.cloned(),
                    key,
                    kind,
                }),
            }
        }

        debug!(
            %source,
            %base,
            target = target_branch,
            source_commits = source_commits.len(),
            applied = applied.len(),
            conflicts = conflicts.len(),
            "computed merge"
        );

        let applied_keys: Vec<ContentKey> = applied.iter().map(|(k, _)| k.clone()).collect();

        let merge_meta = || {
            options
                .meta
                .clone()
                .unwrap_or_else(|| {
                    CommitMeta::new(
                        "",
                        format!("Merge {} into {}", &source.to_hex()[..12], target_branch),
                    )
                })
                .with_property("merge-source", source.to_hex())
                .with_property("merge-base", base.to_hex())
        };

        let mut plan: Plan = match options.mode {
            MergeMode::Squash if applied.is_empty() => Vec::new(),
            MergeMode::Squash => {
                let mutations = applied
                    .into_iter()
                    .map(|(key, entry)| Mutation::to_entry(key, entry))
                    .collect();
                vec![(merge_meta(), mutations)]
            }
            MergeMode::Replay => {
                let keep: BTreeSet<&ContentKey> = applied_keys.iter().collect();
                source_commits
                    .iter()
                    .filter_map(|c| {
                        let mutations: Vec<Mutation> = c
                            .mutations
                            .iter()
                            .filter(|m| keep.contains(m.key()))
                            .cloned()
                            .collect();
                        (!mutations.is_empty()).then(|| (c.meta.clone(), mutations))
                    })
                    .collect()
            }
        };

        // A clean merge records the source as a parent so the next merge from
        // the same history starts here. Skipped conflicts leave it unrecorded.
        let merge_parent = conflicts.is_empty().then_some(source);
        if merge_parent.is_some() && plan.is_empty() {
            plan.push((merge_meta(), Vec::new()));
        }

        self.finish(
            target,
            Some(source),
            Some(base),
            merge_parent,
            plan,
            applied_keys,
            conflicts,
            options,
            |result| ReferenceEvent::Merged {
                reference: result.target_branch.clone(),
                previous: result.expected_head,
                head: result.resulting_head,
                source: result.source_head,
                commits: result.created_commits.clone(),
            },
        )
    }

    /// Apply the given commits, in order, onto `target_branch`.
    ///
    /// Each commit's changes are judged against its own parent: a key is
    /// applied only if the target still holds the value the commit started
    /// from.
    pub fn transplant(
        &self,
        sequence: &[CommitId],
        target_branch: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        if sequence.is_empty() {
            return Err(StoreError::Validation(
                "transplant needs at least one commit".into(),
            ));
        }

        let target = self.target_branch(target_branch, options)?;
        let head = target.head;

        let commits: Vec<Arc<Commit>> = sequence
            .iter()
            .map(|id| self.commits.get(id))
            .collect::<Result<_>>()?;

        let all_keys: Vec<ContentKey> = commits
            .iter()
            .flat_map(|c| c.mutations.iter().map(|m| m.key().clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        // Target state as the transplant progresses.
        let current = self.resolver.lookup(&head, &all_keys)?;
        let mut working: BTreeMap<ContentKey, Option<ContentEntry>> = all_keys
            .iter()
            .map(|key| (key.clone(), current.get(key).cloned()))
            .collect();

        let mut plan: Plan = Vec::new();
        let mut squashed: BTreeMap<ContentKey, Option<ContentEntry>> = BTreeMap::new();
        let mut applied_keys: BTreeSet<ContentKey> = BTreeSet::new();
        let mut conflicts = Vec::new();

        for commit in &commits {
            let keys: Vec<ContentKey> = commit
                .mutations
                .iter()
                .map(|m| m.key().clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            let before = match commit.parent {
                Some(parent) => self.resolver.lookup(&parent, &keys)?,
                None => BTreeMap::new(),
            };
            let after = self.resolver.lookup(&commit.id, &keys)?;

            let mut mutations = Vec::new();
            for key in keys {
                let b = before.get(&key);
                let s = after.get(&key);
                let t = working.get(&key).and_then(Option::as_ref);
                match decide(b, s, t) {
                    Decision::Apply => {
                        working.insert(key.clone(), s.cloned());
                        mutations.push(Mutation::to_entry(key.clone(), s.cloned()));
                        applied_keys.insert(key);
                    }
                    Decision::Skip => {}
                    Decision::Conflict(kind) => conflicts.push(Conflict {
                        base: b.cloned(),
                        source: s.cloned(),
                        target: t.cloned(),
                        key,
                        kind,
                    }),
                }
            }

            if mutations.is_empty() {
                continue;
            }
            match options.mode {
                MergeMode::Replay => plan.push((commit.meta.clone(), mutations)),
                MergeMode::Squash => {
                    for mutation in mutations {
                        squashed.insert(mutation.key().clone(), mutation.entry());
                    }
                }
            }
        }

        if options.mode == MergeMode::Squash && !squashed.is_empty() {
            let meta = options.meta.clone().unwrap_or_else(|| {
                CommitMeta::new(
                    "",
                    format!("Transplant {} commit(s) onto {}", commits.len(), target_branch),
                )
            });
            let mutations = squashed
                .into_iter()
                .map(|(key, entry)| Mutation::to_entry(key, entry))
                .collect();
            plan.push((meta, mutations));
        }

        let source_head = sequence.last().copied();
        self.finish(
            target,
            source_head,
            None,
            None,
            plan,
            applied_keys.into_iter().collect(),
            conflicts,
            options,
            |result| ReferenceEvent::Transplanted {
                reference: result.target_branch.clone(),
                previous: result.expected_head,
                head: result.resulting_head,
                commits: result.created_commits.clone(),
            },
        )
    }

    /// Target must be an existing branch at the expected head (if given).
    fn target_branch(&self, name: &str, options: &MergeOptions) -> Result<Reference> {
        let target = self.refs.get(name)?;
        if target.kind != ReferenceKind::Branch {
            return Err(StoreError::Validation(format!(
                "cannot merge into {} '{}', only branches accept commits",
                target.kind, name
            )));
        }
        if let Some(expected) = options.expected_target {
            if expected != target.head {
                return Err(StoreError::ReferenceConflict {
                    name: name.to_string(),
                    expected,
                    actual: target.head,
                });
            }
        }
        Ok(target)
    }

    /// Write the planned commits, swing the target reference and publish
    /// the event built by `announce`.
    ///
    /// The last written commit carries `merge_parent`.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        target: Reference,
        source_head: Option<CommitId>,
        common_ancestor: Option<CommitId>,
        merge_parent: Option<CommitId>,
        plan: Plan,
        applied_keys: Vec<ContentKey>,
        conflicts: Vec<Conflict>,
        options: &MergeOptions,
        announce: impl FnOnce(&MergeResult) -> ReferenceEvent,
    ) -> Result<MergeResult> {
        let head = target.head;
        let mut result = MergeResult {
            target_branch: target.name,
            expected_head: head,
            resulting_head: head,
            source_head,
            common_ancestor,
            created_commits: Vec::new(),
            applied_keys,
            conflicts,
            was_applied: false,
        };

        if options.dry_run {
            return Ok(result);
        }

        if result.has_conflicts() && options.conflict_policy == ConflictPolicy::Abort {
            warn!(
                target = %result.target_branch,
                conflicts = result.conflicts.len(),
                "merge aborted on conflicts"
            );
            return Err(StoreError::MergeConflict(result.conflicts));
        }

        if plan.is_empty() {
            return Ok(result);
        }

        let mut parent = head;
        let last = plan.len() - 1;
        for (i, (meta, mutations)) in plan.into_iter().enumerate() {
            let merged_from = if i == last { merge_parent } else { None };
            parent = self
                .commits
                .create_merge(Some(parent), merged_from, mutations, meta)?;
            result.created_commits.push(parent);
        }

        let _order = self.refs.update_guard();
        self.refs.assign(&result.target_branch, head, parent)?;

        info!(
            target = %result.target_branch,
            from = %head,
            to = %parent,
            commits = result.created_commits.len(),
            conflicts = result.conflicts.len(),
            "merged into branch"
        );

        result.resulting_head = parent;
        result.was_applied = true;
        self.events.publish(announce(&result));
        Ok(result)
    }
}
