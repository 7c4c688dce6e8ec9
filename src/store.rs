//! Main VersionStore struct tying all components together.

use crate::backend::{FsBackend, MemoryBackend, ObjectBackend, ReferenceBackend};
use crate::commits::CommitStore;
use crate::contents::ContentStore;
use crate::diff::{DiffEngine, DiffEntry, DiffOptions};
use crate::error::{Result, StoreError};
use crate::events::{EventBus, EventConfig, ReferenceEvent, SubscriptionHandle, SubscriptionId};
use crate::merge::{MergeEngine, MergeOptions, MergeResult};
use crate::refs::{validate_reference_name, ReferenceManager, DEFAULT_BRANCH};
use crate::snapshot::{Snapshot, SnapshotResolver};
use crate::types::{
    Commit, CommitId, CommitMeta, Content, ContentEntry, ContentHash, ContentId, ContentKey,
    Mutation, Operation, RefSpec, RefTarget, Reference, ReferenceKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base path for the filesystem backend.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Content cache size (number of payloads).
    pub content_cache_size: usize,

    /// Commit cache size (number of decoded commits).
    pub commit_cache_size: usize,

    /// Snapshot cache size (number of resolved snapshots).
    pub snapshot_cache_size: usize,

    /// Commits between persisted snapshots; 0 disables checkpoints.
    pub checkpoint_interval: u64,

    /// Branch created at the root commit on first open.
    pub default_branch: String,

    /// Maximum number of elements in a content key.
    pub max_key_elements: usize,

    /// Maximum total length of a content key in bytes.
    pub max_key_length: usize,

    /// Buffer size for event subscriptions created via `subscribe_all`.
    pub event_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./refstore"),
            create_if_missing: true,
            content_cache_size: 1000,
            commit_cache_size: 4096,
            snapshot_cache_size: 64,
            checkpoint_interval: 32,
            default_branch: DEFAULT_BRANCH.to_string(),
            max_key_elements: 20,
            max_key_length: 500,
            event_buffer_size: 1000,
        }
    }
}

impl StoreConfig {
    /// Config rooted at `path`, everything else default.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(s)
            .map_err(|e| StoreError::Validation(format!("invalid store config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        validate_reference_name(&self.default_branch)?;
        if self.max_key_elements == 0 || self.max_key_length == 0 {
            return Err(StoreError::Validation(
                "key limits must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// The versioned metadata store.
///
/// Provides a unified interface for:
/// - Committing key changes onto branches
/// - Reading values, keys and snapshots at any reference or commit
/// - Creating, moving and deleting references
/// - Diffing, merging and transplanting between references
pub struct VersionStore {
    config: StoreConfig,
    root: CommitId,
    contents: Arc<ContentStore>,
    commits: Arc<CommitStore>,
    resolver: Arc<SnapshotResolver>,
    refs: Arc<ReferenceManager>,
    diffs: DiffEngine,
    merges: MergeEngine,
    events: Arc<EventBus>,
}

impl VersionStore {
    /// Store kept entirely in memory.
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        let backend = Arc::new(MemoryBackend::new());
        Self::with_backends(backend.clone(), backend, config)
    }

    /// Open (or create, if allowed) a filesystem store at `config.path`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let backend = Arc::new(FsBackend::open(&config.path, config.create_if_missing)?);
        info!(path = %backend.path().display(), "opened store directory");
        Self::with_backends(backend.clone(), backend, config)
    }

    /// Store over caller-supplied backends.
    ///
    /// Ensures the root commit and the default branch exist.
    pub fn with_backends(
        objects: Arc<dyn ObjectBackend>,
        references: Arc<dyn ReferenceBackend>,
        config: StoreConfig,
    ) -> Result<Self> {
        config.validate()?;

        let contents = Arc::new(ContentStore::new(
            Arc::clone(&objects),
            config.content_cache_size,
        ));
        let commits = Arc::new(CommitStore::new(
            Arc::clone(&objects),
            config.commit_cache_size,
        ));
        let resolver = Arc::new(SnapshotResolver::new(
            Arc::clone(&commits),
            objects,
            config.checkpoint_interval,
            config.snapshot_cache_size,
        ));
        let refs = Arc::new(ReferenceManager::new(
            references,
            Arc::clone(&commits),
            config.default_branch.clone(),
        ));

        let root = commits.create_root()?;
        refs.ensure_default_branch(root)?;

        let events = Arc::new(EventBus::with_buffer_size(config.event_buffer_size));
        let diffs = DiffEngine::new(Arc::clone(&resolver));
        let merges = MergeEngine::new(
            Arc::clone(&commits),
            Arc::clone(&resolver),
            Arc::clone(&refs),
            Arc::clone(&events),
        );

        info!(default_branch = %config.default_branch, root = %root, "version store ready");

        Ok(Self {
            config,
            root,
            contents,
            commits,
            resolver,
            refs,
            diffs,
            merges,
            events,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The empty commit every history starts from.
    pub fn root_commit(&self) -> CommitId {
        self.root
    }

    pub fn contents(&self) -> &ContentStore {
        &self.contents
    }

    pub fn commits(&self) -> &CommitStore {
        &self.commits
    }

    pub fn resolver(&self) -> &SnapshotResolver {
        &self.resolver
    }

    // --- References ---

    pub fn default_branch(&self) -> &str {
        self.refs.default_branch()
    }

    pub fn get_reference(&self, name: &str) -> Result<Reference> {
        self.refs.get(name)
    }

    /// All references sorted by name.
    pub fn list_references(&self) -> Result<Vec<Reference>> {
        self.refs.list()
    }

    pub fn list_branches(&self) -> Result<Vec<Reference>> {
        self.refs.list_kind(ReferenceKind::Branch)
    }

    pub fn list_tags(&self) -> Result<Vec<Reference>> {
        self.refs.list_kind(ReferenceKind::Tag)
    }

    /// Create a branch or tag at an existing reference's head or at a commit.
    pub fn create_reference(
        &self,
        name: &str,
        kind: ReferenceKind,
        target: RefTarget,
    ) -> Result<Reference> {
        let _order = self.refs.update_guard();
        let created = match target {
            RefTarget::Reference(from) => self.refs.create_from(name, kind, &from)?,
            RefTarget::Commit(id) => self.refs.create(name, kind, id)?,
        };

        self.events.publish(ReferenceEvent::ReferenceCreated {
            reference: created.name.clone(),
            kind: created.kind,
            head: created.head,
        });
        Ok(created)
    }

    /// Repoint `name` from `expected` to `new_head`.
    pub fn assign_reference(
        &self,
        name: &str,
        expected: CommitId,
        new_head: CommitId,
    ) -> Result<Reference> {
        let _order = self.refs.update_guard();
        let assigned = self.refs.assign(name, expected, new_head)?;

        self.events.publish(ReferenceEvent::ReferenceAssigned {
            reference: assigned.name.clone(),
            previous: expected,
            head: assigned.head,
        });
        Ok(assigned)
    }

    /// Delete `name` if it still points at `expected`.
    pub fn delete_reference(&self, name: &str, expected: CommitId) -> Result<Reference> {
        let _order = self.refs.update_guard();
        let deleted = self.refs.delete(name, expected)?;

        self.events.publish(ReferenceEvent::ReferenceDeleted {
            reference: deleted.name.clone(),
            head: deleted.head,
        });
        Ok(deleted)
    }

    /// Resolve a [`RefSpec`] to a commit id.
    ///
    /// `name@<hash>` only resolves if the commit is in the reference's history.
    pub fn resolve(&self, at: impl Into<RefSpec>) -> Result<CommitId> {
        match at.into() {
            RefSpec::Named(name) => self.refs.resolve(&name),
            RefSpec::NamedAt(name, id) => {
                let head = self.refs.resolve(&name)?;
                if !self.commits.contains(&id)? || !self.commits.is_ancestor(&id, &head)? {
                    return Err(StoreError::CommitNotFound(id));
                }
                Ok(id)
            }
            RefSpec::Commit(id) => {
                if !self.commits.contains(&id)? {
                    return Err(StoreError::CommitNotFound(id));
                }
                Ok(id)
            }
        }
    }

    // --- Commits ---

    /// Apply `operations` on top of `branch`, which must currently point at
    /// `expected`.
    ///
    /// Every operation is validated against the parent snapshot before anything
    /// is written. Later operations on the same key win. Fails with
    /// [`StoreError::ReferenceConflict`] if the branch has moved; the caller
    /// re-reads the head and retries.
    pub fn commit(
        &self,
        branch: &str,
        expected: CommitId,
        operations: Vec<Operation>,
        meta: CommitMeta,
    ) -> Result<CommitId> {
        let reference = self.refs.get(branch)?;
        if reference.kind != ReferenceKind::Branch {
            return Err(StoreError::Validation(format!(
                "cannot commit to {} '{}', only branches accept commits",
                reference.kind, branch
            )));
        }
        if reference.head != expected {
            return Err(StoreError::ReferenceConflict {
                name: branch.to_string(),
                expected,
                actual: reference.head,
            });
        }

        for op in &operations {
            op.key()
                .validate(self.config.max_key_elements, self.config.max_key_length)
                .map_err(|e| StoreError::Validation(format!("key '{}': {}", op.key(), e)))?;
        }

        let keys: Vec<ContentKey> = operations.iter().map(|op| op.key().clone()).collect();
        let existing = self.resolver.lookup(&expected, &keys)?;

        // Key state as the operations are applied, seeded from the parent.
        let mut working: BTreeMap<ContentKey, Option<ContentEntry>> = keys
            .iter()
            .map(|key| (key.clone(), existing.get(key).cloned()))
            .collect();
        let mut touched: Vec<ContentKey> = Vec::new();
        let mut payloads: Vec<&[u8]> = Vec::new();

        for op in &operations {
            let key = op.key();
            let current = working.get(key).cloned().flatten();
            let next = match op {
                Operation::Put {
                    payload,
                    content_id,
                    ..
                } => {
                    let id = match (current, content_id) {
                        (Some(current), Some(requested)) if current.id != *requested => {
                            return Err(StoreError::Validation(format!(
                                "key '{}' holds content {}, not {}",
                                key, current.id, requested
                            )));
                        }
                        (Some(current), _) => current.id,
                        (None, Some(requested)) => requested.clone(),
                        (None, None) => ContentId::random(),
                    };
                    payloads.push(payload);
                    Some(ContentEntry {
                        id,
                        hash: ContentHash::of(payload),
                    })
                }
                Operation::Delete { .. } => {
                    if current.is_none() {
                        return Err(StoreError::Validation(format!(
                            "cannot delete '{}': key does not exist",
                            key
                        )));
                    }
                    None
                }
            };
            working.insert(key.clone(), next);
            if !touched.contains(key) {
                touched.push(key.clone());
            }
        }

        for payload in payloads {
            self.contents.put(payload)?;
        }

        let mutations: Vec<Mutation> = touched
            .into_iter()
            .map(|key| {
                let entry = working.get(&key).cloned().flatten();
                Mutation::to_entry(key, entry)
            })
            .collect();
        let mutation_count = mutations.len();
        let author = meta.author.clone();

        let id = self.commits.create(Some(expected), mutations, meta)?;
        let depth = self.commits.get(&id)?.depth;
        if self.resolver.is_checkpoint_depth(depth) {
            // resolving writes the checkpoint
            self.resolver.resolve(&id)?;
        }

        let _order = self.refs.update_guard();
        self.refs.assign(branch, expected, id)?;

        info!(branch, from = %expected, to = %id, depth, mutations = mutation_count, "committed");
        self.events.publish(ReferenceEvent::Committed {
            reference: branch.to_string(),
            previous: expected,
            head: id,
            author,
            mutations: mutation_count,
        });
        Ok(id)
    }

    /// Commits reachable from `at`, newest first.
    pub fn commit_log(&self, at: impl Into<RefSpec>, limit: Option<usize>) -> Result<Vec<Commit>> {
        let head = self.resolve(at)?;
        let limit = limit.unwrap_or(usize::MAX);

        self.commits
            .parent_chain(head)
            .take(limit)
            .map(|commit| commit.map(|c| c.as_ref().clone()))
            .collect()
    }

    // --- Reads ---

    /// Content stored under `key`, if any.
    pub fn get_value(&self, at: impl Into<RefSpec>, key: &ContentKey) -> Result<Option<Content>> {
        let commit = self.resolve(at)?;
        match self.resolver.get(&commit, key)? {
            Some(entry) => Ok(Some(self.load_content(key.clone(), entry)?)),
            None => Ok(None),
        }
    }

    /// Contents for those of `keys` that exist.
    pub fn get_values(
        &self,
        at: impl Into<RefSpec>,
        keys: &[ContentKey],
    ) -> Result<BTreeMap<ContentKey, Content>> {
        let commit = self.resolve(at)?;
        self.resolver
            .lookup(&commit, keys)?
            .into_iter()
            .map(|(key, entry)| {
                let content = self.load_content(key.clone(), entry)?;
                Ok((key, content))
            })
            .collect()
    }

    /// Keys present at `at`, sorted, optionally restricted to a prefix.
    pub fn get_keys(
        &self,
        at: impl Into<RefSpec>,
        prefix: Option<&ContentKey>,
    ) -> Result<Vec<ContentKey>> {
        let snapshot = self.get_snapshot(at)?;
        let keys = match prefix {
            Some(prefix) => snapshot.with_prefix(prefix).map(|(k, _)| k.clone()).collect(),
            None => snapshot.keys().cloned().collect(),
        };
        Ok(keys)
    }

    /// Full key→content mapping at `at`.
    pub fn get_snapshot(&self, at: impl Into<RefSpec>) -> Result<Snapshot> {
        let commit = self.resolve(at)?;
        self.resolver.resolve(&commit)
    }

    fn load_content(&self, key: ContentKey, entry: ContentEntry) -> Result<Content> {
        let payload = self.contents.get(&entry.hash)?;
        Ok(Content {
            key,
            id: entry.id,
            hash: entry.hash,
            payload: payload.as_ref().clone(),
        })
    }

    // --- Diff / merge ---

    /// Key-level changes going from `from` to `to`.
    pub fn diff(
        &self,
        from: impl Into<RefSpec>,
        to: impl Into<RefSpec>,
        options: &DiffOptions,
    ) -> Result<Vec<DiffEntry>> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        self.diffs.diff(&from, &to, options)
    }

    /// Merge `from` into the branch `to_branch`.
    pub fn merge(
        &self,
        from: impl Into<RefSpec>,
        to_branch: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        let source = self.resolve(from)?;
        let result = self.merges.merge(source, to_branch, options)?;

        if !result.was_applied {
            debug!(source = %source, target = to_branch, dry_run = options.dry_run, "merge left target unchanged");
        }
        Ok(result)
    }

    /// Apply `commits`, in order, onto the branch `to_branch`.
    pub fn transplant(
        &self,
        commits: &[CommitId],
        to_branch: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        self.merges.transplant(commits, to_branch, options)
    }

    // --- Events ---

    /// Receive events about future reference updates.
    pub fn subscribe(&self, config: EventConfig) -> SubscriptionHandle {
        self.events.subscribe(config)
    }

    /// Subscribe to every event with the configured buffer size.
    pub fn subscribe_all(&self) -> SubscriptionHandle {
        self.events.subscribe_default()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id)
    }
}
