//! In-memory backend.

use super::{ObjectBackend, ObjectKind, RefTable, ReferenceBackend};
use crate::error::Result;
use crate::types::{CommitId, Hash, Reference};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Volatile backend for tests and embedded use.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<(ObjectKind, Hash), Vec<u8>>>,
    refs: RwLock<RefTable>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects of one kind.
    pub fn object_count(&self, kind: ObjectKind) -> usize {
        self.objects.read().keys().filter(|(k, _)| *k == kind).count()
    }
}

impl ObjectBackend for MemoryBackend {
    fn put_object(&self, kind: ObjectKind, key: &Hash, data: &[u8]) -> Result<bool> {
        let mut objects = self.objects.write();
        if objects.contains_key(&(kind, *key)) {
            return Ok(false);
        }
        objects.insert((kind, *key), data.to_vec());
        Ok(true)
    }

    fn get_object(&self, kind: ObjectKind, key: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().get(&(kind, *key)).cloned())
    }

    fn contains_object(&self, kind: ObjectKind, key: &Hash) -> Result<bool> {
        Ok(self.objects.read().contains_key(&(kind, *key)))
    }
}

impl ReferenceBackend for MemoryBackend {
    fn get_reference(&self, name: &str) -> Result<Option<Reference>> {
        Ok(self.refs.read().get(name))
    }

    fn list_references(&self) -> Result<Vec<Reference>> {
        Ok(self.refs.read().list())
    }

    fn create_reference(&self, reference: Reference) -> Result<()> {
        self.refs.write().create(reference)
    }

    fn compare_and_swap(
        &self,
        name: &str,
        expected: CommitId,
        new_head: CommitId,
    ) -> Result<Reference> {
        self.refs.write().compare_and_swap(name, expected, new_head)
    }

    fn delete_reference(&self, name: &str, expected: CommitId) -> Result<Reference> {
        self.refs.write().delete(name, expected)
    }
}
