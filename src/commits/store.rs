//! Commit store implementation.

use crate::backend::{ObjectBackend, ObjectKind};
use crate::error::{Result, StoreError};
use crate::types::{Commit, CommitId, CommitMeta, Hash, Mutation, Timestamp};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Canonical encoding used for hashing and storage.
#[derive(Serialize)]
struct CommitBodyRef<'a> {
    parent: Option<CommitId>,
    merge_parent: Option<CommitId>,
    depth: u64,
    generation: u64,
    meta: &'a CommitMeta,
    mutations: &'a [Mutation],
}

/// Owned mirror of [`CommitBodyRef`]; the field order must stay identical.
#[derive(Deserialize)]
struct CommitBody {
    parent: Option<CommitId>,
    merge_parent: Option<CommitId>,
    depth: u64,
    generation: u64,
    meta: CommitMeta,
    mutations: Vec<Mutation>,
}

// Paint bits for the two-sided ancestry walks.
const LEFT: u8 = 0b01;
const RIGHT: u8 = 0b10;
const BOTH: u8 = LEFT | RIGHT;

/// Append-only commit storage with a decoded-commit cache.
pub struct CommitStore {
    backend: Arc<dyn ObjectBackend>,
    cache: Mutex<LruCache<CommitId, Arc<Commit>>>,
}

impl CommitStore {
    pub fn new(backend: Arc<dyn ObjectBackend>, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Metadata of the well-known empty root commit.
    pub fn root_meta() -> CommitMeta {
        CommitMeta {
            author: String::new(),
            message: "root".to_string(),
            timestamp: Timestamp(0),
            properties: BTreeMap::new(),
        }
    }

    /// Create (or find) the empty root commit every store starts from.
    pub fn create_root(&self) -> Result<CommitId> {
        self.create(None, Vec::new(), Self::root_meta())
    }

    /// Store a commit and return its id.
    ///
    /// Idempotent: identical parent, metadata and mutations always produce the
    /// same id and are stored once.
    pub fn create(
        &self,
        parent: Option<CommitId>,
        mutations: Vec<Mutation>,
        meta: CommitMeta,
    ) -> Result<CommitId> {
        self.create_merge(parent, None, mutations, meta)
    }

    /// Store a commit that also records `merge_parent` as an ancestor.
    ///
    /// The mutations alone still turn the first parent's snapshot into this
    /// commit's snapshot; the merge parent only takes part in ancestry.
    pub fn create_merge(
        &self,
        parent: Option<CommitId>,
        merge_parent: Option<CommitId>,
        mutations: Vec<Mutation>,
        meta: CommitMeta,
    ) -> Result<CommitId> {
        if merge_parent.is_some() && parent.is_none() {
            return Err(StoreError::Validation(
                "a merge commit needs a first parent".into(),
            ));
        }

        let (depth, mut generation) = match parent {
            Some(parent_id) => {
                let parent = self.get(&parent_id)?;
                (parent.depth + 1, parent.generation + 1)
            }
            None => (0, 0),
        };
        if let Some(merge_id) = merge_parent {
            generation = generation.max(self.get(&merge_id)?.generation + 1);
        }

        let encoded = rmp_serde::to_vec(&CommitBodyRef {
            parent,
            merge_parent,
            depth,
            generation,
            meta: &meta,
            mutations: &mutations,
        })?;
        let id = CommitId(Hash::from_bytes(&encoded));

        let written = self.backend.put_object(ObjectKind::Commit, &id.0, &encoded)?;
        if written {
            debug!(
                commit = %id,
                ?parent,
                ?merge_parent,
                depth,
                mutations = mutations.len(),
                "stored commit"
            );
        }

        self.cache.lock().put(
            id,
            Arc::new(Commit {
                id,
                parent,
                merge_parent,
                depth,
                generation,
                meta,
                mutations,
            }),
        );

        Ok(id)
    }

    /// Get a commit by id.
    pub fn get(&self, id: &CommitId) -> Result<Arc<Commit>> {
        if let Some(commit) = self.cache.lock().get(id).cloned() {
            return Ok(commit);
        }

        let encoded = self
            .backend
            .get_object(ObjectKind::Commit, &id.0)?
            .ok_or(StoreError::CommitNotFound(*id))?;

        let body: CommitBody = rmp_serde::from_slice(&encoded)?;
        let commit = Arc::new(Commit {
            id: *id,
            parent: body.parent,
            merge_parent: body.merge_parent,
            depth: body.depth,
            generation: body.generation,
            meta: body.meta,
            mutations: body.mutations,
        });

        self.cache.lock().put(*id, Arc::clone(&commit));
        Ok(commit)
    }

    /// Check if a commit exists.
    pub fn contains(&self, id: &CommitId) -> Result<bool> {
        if self.cache.lock().contains(id) {
            return Ok(true);
        }
        self.backend.contains_object(ObjectKind::Commit, &id.0)
    }

    /// Lazily walk first parents from `id` toward the root, starting with `id`.
    pub fn parent_chain(&self, id: CommitId) -> ParentChain<'_> {
        ParentChain {
            store: self,
            next: Some(id),
        }
    }

    // --- Ancestry ---
    //
    // Ancestry follows both parent edges. Generations strictly decrease along
    // every edge, so walks ordered by generation visit a commit only after
    // all of its explored descendants.

    /// Whether `ancestor` is `descendant` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool> {
        let floor = self.get(ancestor)?.generation;
        let mut seen = HashSet::new();
        let mut pending = vec![*descendant];

        while let Some(id) = pending.pop() {
            if id == *ancestor {
                return Ok(true);
            }
            if !seen.insert(id) {
                continue;
            }
            let commit = self.get(&id)?;
            if commit.generation <= floor {
                continue;
            }
            pending.extend(commit.parents());
        }

        Ok(false)
    }

    /// Nearest commit reachable from both `a` and `b`.
    ///
    /// Both sides are painted downward in generation order; the first commit
    /// carrying both colors has the highest generation of any common ancestor.
    pub fn merge_base(&self, a: &CommitId, b: &CommitId) -> Result<CommitId> {
        if a == b {
            self.get(a)?;
            return Ok(*a);
        }

        let mut walk = PaintWalk::new(self);
        walk.paint(*a, LEFT)?;
        walk.paint(*b, RIGHT)?;

        while let Some((commit, paint)) = walk.pop()? {
            if paint == BOTH {
                return Ok(commit.id);
            }
            walk.paint_parents(&commit, paint)?;
        }

        Err(StoreError::NoCommonAncestor(*a, *b))
    }

    /// Commits reachable from `head` but not from `base`, oldest first.
    ///
    /// `base` must be an ancestor of `head`. On a linear history this is the
    /// first-parent chain after `base`.
    pub fn commits_between(&self, base: &CommitId, head: &CommitId) -> Result<Vec<Arc<Commit>>> {
        if !self.is_ancestor(base, head)? {
            return Err(StoreError::NoCommonAncestor(*base, *head));
        }

        let mut walk = PaintWalk::new(self);
        walk.paint(*head, LEFT)?;
        walk.paint(*base, RIGHT)?;

        let mut commits = Vec::new();
        while walk.head_only > 0 {
            let Some((commit, paint)) = walk.pop()? else {
                break;
            };
            walk.paint_parents(&commit, paint)?;
            if paint == LEFT {
                commits.push(commit);
            }
        }

        commits.sort_by_key(|c| (c.generation, c.id));
        Ok(commits)
    }
}

/// Generation-ordered walk painting commits with [`LEFT`]/[`RIGHT`] bits.
struct PaintWalk<'a> {
    store: &'a CommitStore,
    queue: BinaryHeap<(u64, CommitId)>,
    paint: HashMap<CommitId, u8>,
    done: HashSet<CommitId>,
    /// Queued commits painted [`LEFT`] only.
    head_only: usize,
}

impl<'a> PaintWalk<'a> {
    fn new(store: &'a CommitStore) -> Self {
        Self {
            store,
            queue: BinaryHeap::new(),
            paint: HashMap::new(),
            done: HashSet::new(),
            head_only: 0,
        }
    }

    fn paint(&mut self, id: CommitId, bits: u8) -> Result<()> {
        let before = self.paint.get(&id).copied().unwrap_or(0);
        let after = before | bits;
        if after == before || self.done.contains(&id) {
            return Ok(());
        }
        self.paint.insert(id, after);

        if before == 0 {
            let generation = self.store.get(&id)?.generation;
            self.queue.push((generation, id));
        }
        if before != LEFT && after == LEFT {
            self.head_only += 1;
        } else if before == LEFT && after != LEFT {
            self.head_only -= 1;
        }
        Ok(())
    }

    fn paint_parents(&mut self, commit: &Commit, bits: u8) -> Result<()> {
        for parent in commit.parents() {
            self.paint(parent, bits)?;
        }
        Ok(())
    }

    /// Next unfinished commit with its final paint.
    fn pop(&mut self) -> Result<Option<(Arc<Commit>, u8)>> {
        while let Some((_, id)) = self.queue.pop() {
            if !self.done.insert(id) {
                continue;
            }
            let paint = self.paint.get(&id).copied().unwrap_or(0);
            if paint == LEFT {
                self.head_only -= 1;
            }
            return Ok(Some((self.store.get(&id)?, paint)));
        }
        Ok(None)
    }
}

/// Lazy root-ward iterator over a commit's ancestry.
pub struct ParentChain<'a> {
    store: &'a CommitStore,
    next: Option<CommitId>,
}

impl Iterator for ParentChain<'_> {
    type Item = Result<Arc<Commit>>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        match self.store.get(&id) {
            Ok(commit) => {
                self.next = commit.parent;
                Some(Ok(commit))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
