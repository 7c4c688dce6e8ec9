//! Reference manager implementation.

use crate::backend::ReferenceBackend;
use crate::commits::CommitStore;
use crate::error::{Result, StoreError};
use crate::types::{CommitId, Reference, ReferenceKind};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the default branch.
pub const DEFAULT_BRANCH: &str = "main";

/// Maximum reference name length in bytes.
const MAX_NAME_LENGTH: usize = 255;

/// Check a reference name.
///
/// Names start with an ASCII letter and continue with letters, digits, `_`,
/// `-`, `.` or `/`. They may not contain `..` and may not end with `.` or `/`.
pub fn validate_reference_name(name: &str) -> Result<()> {
    let invalid = |why: &str| Err(StoreError::Validation(format!("invalid reference name '{}': {}", name, why)));

    if name.is_empty() {
        return invalid("empty");
    }
    if name.len() > MAX_NAME_LENGTH {
        return invalid("too long");
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return invalid("must start with a letter");
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/')))
    {
        return invalid(&format!("character '{}' is not allowed", c));
    }
    if name.contains("..") {
        return invalid("must not contain '..'");
    }
    if name.ends_with('.') || name.ends_with('/') {
        return invalid("must not end with '.' or '/'");
    }
    Ok(())
}

/// Manages references on top of a [`ReferenceBackend`].
pub struct ReferenceManager {
    backend: Arc<dyn ReferenceBackend>,
    commits: Arc<CommitStore>,
    default_branch: String,
    updates: Mutex<()>,
}

impl ReferenceManager {
    pub fn new(
        backend: Arc<dyn ReferenceBackend>,
        commits: Arc<CommitStore>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            commits,
            default_branch: default_branch.into(),
            updates: Mutex::new(()),
        }
    }

    /// Serializes reference updates with the events announcing them.
    ///
    /// Held across an update and its publish, so subscribers see the events
    /// of one reference in the order its head moved.
    pub fn update_guard(&self) -> MutexGuard<'_, ()> {
        self.updates.lock()
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// Create the default branch at `root` unless it already exists.
    pub fn ensure_default_branch(&self, root: CommitId) -> Result<Reference> {
        if let Some(existing) = self.backend.get_reference(&self.default_branch)? {
            return Ok(existing);
        }
        match self.create(&self.default_branch, ReferenceKind::Branch, root) {
            Ok(reference) => Ok(reference),
            // lost a race with another initializer
            Err(StoreError::ReferenceAlreadyExists(_)) => self.get(&self.default_branch),
            Err(e) => Err(e),
        }
    }

    /// Create a reference pointing at an existing commit.
    pub fn create(&self, name: &str, kind: ReferenceKind, target: CommitId) -> Result<Reference> {
        validate_reference_name(name)?;

        if !self.commits.contains(&target)? {
            return Err(StoreError::CommitNotFound(target));
        }

        let reference = Reference {
            name: name.to_string(),
            kind,
            head: target,
        };
        self.backend.create_reference(reference.clone())?;

        info!(reference = name, %kind, head = %target, "created reference");
        Ok(reference)
    }

    /// Create a reference at the current head of `from`.
    pub fn create_from(&self, name: &str, kind: ReferenceKind, from: &str) -> Result<Reference> {
        let source = self.get(from)?;
        self.create(name, kind, source.head)
    }

    /// Move `name` from `expected` to `new_head`.
    ///
    /// Fails with [`StoreError::ReferenceConflict`] if another writer moved the
    /// reference since the caller read `expected`.
    pub fn assign(&self, name: &str, expected: CommitId, new_head: CommitId) -> Result<Reference> {
        if !self.commits.contains(&new_head)? {
            return Err(StoreError::CommitNotFound(new_head));
        }

        match self.backend.compare_and_swap(name, expected, new_head) {
            Ok(reference) => {
                debug!(reference = name, from = %expected, to = %new_head, "moved reference");
                Ok(reference)
            }
            Err(e) => {
                if let StoreError::ReferenceConflict { actual, .. } = &e {
                    debug!(reference = name, %expected, %actual, "reference update lost race");
                }
                Err(e)
            }
        }
    }

    /// Delete `name` if it still points at `expected`.
    ///
    /// Commits the reference pointed to are left in place.
    pub fn delete(&self, name: &str, expected: CommitId) -> Result<Reference> {
        if name == self.default_branch {
            return Err(StoreError::Validation(format!(
                "cannot delete the default branch '{}'",
                name
            )));
        }

        let deleted = self.backend.delete_reference(name, expected)?;
        info!(reference = name, head = %expected, "deleted reference");
        Ok(deleted)
    }

    /// Get a reference by name.
    pub fn get(&self, name: &str) -> Result<Reference> {
        self.backend
            .get_reference(name)?
            .ok_or_else(|| StoreError::ReferenceNotFound(name.to_string()))
    }

    /// Current head of a reference.
    pub fn resolve(&self, name: &str) -> Result<CommitId> {
        Ok(self.get(name)?.head)
    }

    /// All references sorted by name.
    pub fn list(&self) -> Result<Vec<Reference>> {
        self.backend.list_references()
    }

    /// References of one kind sorted by name.
    pub fn list_kind(&self, kind: ReferenceKind) -> Result<Vec<Reference>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect())
    }
}
