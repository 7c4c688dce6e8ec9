//! Authorization of mutating store operations.
//!
//! The store performs no identity logic itself. A [`Session`] binds a
//! [`Principal`] to an injected [`Authorizer`] and asks it before every
//! mutating call; reads are forwarded unchecked.

use crate::diff::{DiffEntry, DiffOptions};
use crate::error::{Result, StoreError};
use crate::merge::{MergeOptions, MergeResult};
use crate::store::VersionStore;
use crate::types::{
    CommitId, CommitMeta, Content, ContentKey, Operation, RefSpec, RefTarget, Reference,
    ReferenceKind,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Who is acting.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Principal(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutating operations subject to authorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    CreateReference,
    AssignReference,
    DeleteReference,
    Commit,
    Merge,
    Transplant,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::CreateReference => "create-reference",
            Action::AssignReference => "assign-reference",
            Action::DeleteReference => "delete-reference",
            Action::Commit => "commit",
            Action::Merge => "merge",
            Action::Transplant => "transplant",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

/// Capability check consulted before mutations.
///
/// `resource` is the name of the reference being changed.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, principal: &Principal, action: Action, resource: &str) -> AccessDecision;
}

/// Permits everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _: &Principal, _: Action, _: &str) -> AccessDecision {
        AccessDecision::Allow
    }
}

/// Coarse role of a principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// No mutations.
    Reader,
    /// Commits and merges onto branches.
    Writer,
    /// Everything, including creating and removing references.
    Admin,
}

impl Role {
    pub fn permits(&self, action: Action) -> bool {
        match self {
            Role::Reader => false,
            Role::Writer => matches!(action, Action::Commit | Action::Merge | Action::Transplant),
            Role::Admin => true,
        }
    }
}

/// Role table keyed by principal name. Unknown principals are denied.
#[derive(Default)]
pub struct RoleAuthorizer {
    roles: RwLock<HashMap<String, Role>>,
}

impl RoleAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, principal: impl Into<String>, role: Role) {
        self.roles.write().insert(principal.into(), role);
    }

    pub fn revoke(&self, principal: &str) {
        self.roles.write().remove(principal);
    }

    pub fn role(&self, principal: &str) -> Option<Role> {
        self.roles.read().get(principal).copied()
    }
}

impl Authorizer for RoleAuthorizer {
    fn authorize(&self, principal: &Principal, action: Action, _resource: &str) -> AccessDecision {
        match self.role(principal.name()) {
            Some(role) if role.permits(action) => AccessDecision::Allow,
            _ => AccessDecision::Deny,
        }
    }
}

/// A store bound to a principal and an authorizer.
pub struct Session<'a> {
    store: &'a VersionStore,
    authorizer: Arc<dyn Authorizer>,
    principal: Principal,
}

impl<'a> Session<'a> {
    pub fn new(store: &'a VersionStore, authorizer: Arc<dyn Authorizer>, principal: Principal) -> Self {
        Self {
            store,
            authorizer,
            principal,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn store(&self) -> &VersionStore {
        self.store
    }

    fn check(&self, action: Action, resource: &str) -> Result<()> {
        match self.authorizer.authorize(&self.principal, action, resource) {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny => {
                warn!(principal = %self.principal, %action, resource, "permission denied");
                Err(StoreError::PermissionDenied {
                    principal: self.principal.to_string(),
                    action: action.to_string(),
                    resource: resource.to_string(),
                })
            }
        }
    }

    // --- Mutations ---

    pub fn create_reference(
        &self,
        name: &str,
        kind: ReferenceKind,
        target: RefTarget,
    ) -> Result<Reference> {
        self.check(Action::CreateReference, name)?;
        self.store.create_reference(name, kind, target)
    }

    pub fn assign_reference(
        &self,
        name: &str,
        expected: CommitId,
        new_head: CommitId,
    ) -> Result<Reference> {
        self.check(Action::AssignReference, name)?;
        self.store.assign_reference(name, expected, new_head)
    }

    pub fn delete_reference(&self, name: &str, expected: CommitId) -> Result<Reference> {
        self.check(Action::DeleteReference, name)?;
        self.store.delete_reference(name, expected)
    }

    pub fn commit(
        &self,
        branch: &str,
        expected: CommitId,
        operations: Vec<Operation>,
        meta: CommitMeta,
    ) -> Result<CommitId> {
        self.check(Action::Commit, branch)?;
        self.store.commit(branch, expected, operations, meta)
    }

    pub fn merge(
        &self,
        from: impl Into<RefSpec>,
        to_branch: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        self.check(Action::Merge, to_branch)?;
        self.store.merge(from, to_branch, options)
    }

    pub fn transplant(
        &self,
        commits: &[CommitId],
        to_branch: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        self.check(Action::Transplant, to_branch)?;
        self.store.transplant(commits, to_branch, options)
    }

    // --- Reads ---

    pub fn get_reference(&self, name: &str) -> Result<Reference> {
        self.store.get_reference(name)
    }

    pub fn list_references(&self) -> Result<Vec<Reference>> {
        self.store.list_references()
    }

    pub fn list_branches(&self) -> Result<Vec<Reference>> {
        self.store.list_branches()
    }

    pub fn list_tags(&self) -> Result<Vec<Reference>> {
        self.store.list_tags()
    }

    pub fn get_value(&self, at: impl Into<RefSpec>, key: &ContentKey) -> Result<Option<Content>> {
        self.store.get_value(at, key)
    }

    pub fn get_values(
        &self,
        at: impl Into<RefSpec>,
        keys: &[ContentKey],
    ) -> Result<BTreeMap<ContentKey, Content>> {
        self.store.get_values(at, keys)
    }

    pub fn get_keys(
        &self,
        at: impl Into<RefSpec>,
        prefix: Option<&ContentKey>,
    ) -> Result<Vec<ContentKey>> {
        self.store.get_keys(at, prefix)
    }

    pub fn diff(
        &self,
        from: impl Into<RefSpec>,
        to: impl Into<RefSpec>,
        options: &DiffOptions,
    ) -> Result<Vec<DiffEntry>> {
        self.store.diff(from, to, options)
    }
}

impl VersionStore {
    /// Session for `principal` checked by `authorizer`.
    pub fn session(&self, authorizer: Arc<dyn Authorizer>, principal: Principal) -> Session<'_> {
        Session::new(self, authorizer, principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;

    fn setup() -> (VersionStore, Arc<RoleAuthorizer>) {
        let store = VersionStore::in_memory(StoreConfig::default()).unwrap();
        let roles = Arc::new(RoleAuthorizer::new());
        roles.grant("reader", Role::Reader);
        roles.grant("writer", Role::Writer);
        roles.grant("admin", Role::Admin);
        (store, roles)
    }

    #[test]
    fn test_roles() {
        assert!(!Role::Reader.permits(Action::Commit));
        assert!(Role::Writer.permits(Action::Commit));
        assert!(Role::Writer.permits(Action::Merge));
        assert!(!Role::Writer.permits(Action::DeleteReference));
        assert!(Role::Admin.permits(Action::CreateReference));
    }

    #[test]
    fn test_denied_commit_writes_nothing() {
        let (store, roles) = setup();
        let root = store.root_commit();
        let session = store.session(roles, Principal::new("reader"));

        let result = session.commit(
            "main",
            root,
            vec![Operation::put("a", b"1".to_vec())],
            CommitMeta::new("reader", "try"),
        );
        match result {
            Err(StoreError::PermissionDenied { principal, action, resource }) => {
                assert_eq!(principal, "reader");
                assert_eq!(action, "commit");
                assert_eq!(resource, "main");
            }
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
        assert_eq!(store.get_reference("main").unwrap().head, root);

        // reads pass through
        assert!(session.get_keys("main", None).unwrap().is_empty());
    }

    #[test]
    fn test_writer_commits_but_cannot_create_references() {
        let (store, roles) = setup();
        let root = store.root_commit();
        let session = store.session(roles.clone(), Principal::new("writer"));

        session
            .commit("main", root, vec![Operation::put("a", b"1".to_vec())], CommitMeta::new("writer", "ok"))
            .unwrap();

        let denied = session.create_reference("feature", ReferenceKind::Branch, RefTarget::Reference("main".into()));
        assert!(matches!(denied, Err(StoreError::PermissionDenied { .. })));

        let admin = store.session(roles, Principal::new("admin"));
        admin
            .create_reference("feature", ReferenceKind::Branch, RefTarget::Reference("main".into()))
            .unwrap();

        // listing is a read
        assert_eq!(session.list_branches().unwrap().len(), 2);
        assert!(session.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_and_revoked_principals_denied() {
        let (store, roles) = setup();
        let root = store.root_commit();

        let stranger = store.session(roles.clone(), Principal::new("stranger"));
        assert!(stranger
            .commit("main", root, vec![], CommitMeta::new("x", "x"))
            .is_err());

        roles.revoke("writer");
        let writer = store.session(roles, Principal::new("writer"));
        assert!(matches!(
            writer.commit("main", root, vec![], CommitMeta::new("x", "x")),
            Err(StoreError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_allow_all() {
        let store = VersionStore::in_memory(StoreConfig::default()).unwrap();
        let session = store.session(Arc::new(AllowAll), Principal::new("anyone"));
        let root = store.root_commit();

        session
            .create_reference("v1", ReferenceKind::Tag, RefTarget::Commit(root))
            .unwrap();
        session.delete_reference("v1", root).unwrap();
    }
}
