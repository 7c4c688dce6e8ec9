//! Core types for the version store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SHA-256 digest used for every content-addressed object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(arr))
    }

    /// First byte of the hash as hex (for sharding).
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[0..1])
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Identity of a commit: hash of its canonical serialization.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(pub Hash);

impl CommitId {
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Hash::from_hex(s).map(CommitId)
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash of a stored content payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub Hash);

impl ContentHash {
    pub fn of(payload: &[u8]) -> Self {
        ContentHash(Hash::from_bytes(payload))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Stable identifier of a logical table/object. Assigned once when a key
/// is first written and carried unchanged across later commits.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentId(pub String);

impl ContentId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        ContentId(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        ContentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Structured path naming an entry in the namespace.
///
/// Keys order lexicographically by segment, so `a` < `a.b` < `b`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentKey(Vec<String>);

impl ContentKey {
    /// Build a key from segments. Use [`ContentKey::validate`] before writing.
    pub fn new<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ContentKey(elements.into_iter().map(Into::into).collect())
    }

    /// Parse a dotted path such as `db.sales.orders`.
    pub fn parse(path: &str) -> Self {
        ContentKey(path.split('.').map(str::to_string).collect())
    }

    pub fn elements(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `prefix`'s segments are a leading run of this key's segments.
    pub fn starts_with(&self, prefix: &ContentKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Check structural limits. Returns a description of the first problem.
    pub fn validate(&self, max_elements: usize, max_length: usize) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("key must have at least one element".into());
        }
        if self.0.len() > max_elements {
            return Err(format!(
                "key '{}' has {} elements, limit is {}",
                self, self.0.len(), max_elements
            ));
        }
        let mut total = 0usize;
        for element in &self.0 {
            if element.is_empty() {
                return Err(format!("key '{}' contains an empty element", self));
            }
            if element.contains('\0') {
                return Err(format!("key '{}' contains a NUL character", self.0.join(".")));
            }
            total += element.len();
        }
        total += self.0.len() - 1;
        if total > max_length {
            return Err(format!(
                "key '{}' is {} bytes long, limit is {}",
                self, total, max_length
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", self.0.join("."))
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for ContentKey {
    fn from(path: &str) -> Self {
        ContentKey::parse(path)
    }
}

/// What a key maps to in a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentEntry {
    pub id: ContentId,
    pub hash: ContentHash,
}

/// A single key change recorded in a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Put {
        key: ContentKey,
        content_id: ContentId,
        content_hash: ContentHash,
    },
    Delete {
        key: ContentKey,
    },
}

impl Mutation {
    pub fn key(&self) -> &ContentKey {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key } => key,
        }
    }

    /// The entry this mutation leaves behind, `None` for a delete.
    pub fn entry(&self) -> Option<ContentEntry> {
        match self {
            Mutation::Put {
                content_id,
                content_hash,
                ..
            } => Some(ContentEntry {
                id: content_id.clone(),
                hash: *content_hash,
            }),
            Mutation::Delete { .. } => None,
        }
    }

    /// Mutation that moves `key` to `entry` (or removes it).
    pub fn to_entry(key: ContentKey, entry: Option<ContentEntry>) -> Self {
        match entry {
            Some(entry) => Mutation::Put {
                key,
                content_id: entry.id,
                content_hash: entry.hash,
            },
            None => Mutation::Delete { key },
        }
    }
}

/// Commit metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub author: String,
    pub message: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl CommitMeta {
    /// Metadata stamped with the current time.
    pub fn new(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            message: message.into(),
            timestamp: Timestamp::now(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// An immutable commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    /// Source head folded in by a merge; a second ancestry edge.
    pub merge_parent: Option<CommitId>,
    /// Distance from the root along first parents (0 for a root commit).
    pub depth: u64,
    /// One more than the highest generation among all parents.
    pub generation: u64,
    pub meta: CommitMeta,
    pub mutations: Vec<Mutation>,
}

impl Commit {
    /// First parent, then merge parent.
    pub fn parents(&self) -> impl Iterator<Item = CommitId> + '_ {
        self.parent.into_iter().chain(self.merge_parent)
    }
}

/// Kind of a named reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// Moved by every commit and merge.
    Branch,
    /// Only moved by explicit reassignment.
    Tag,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Branch => write!(f, "branch"),
            ReferenceKind::Tag => write!(f, "tag"),
        }
    }
}

/// Named pointer to a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub name: String,
    pub kind: ReferenceKind,
    pub head: CommitId,
}

/// Content returned by value lookups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Content {
    pub key: ContentKey,
    pub id: ContentId,
    pub hash: ContentHash,
    pub payload: Vec<u8>,
}

impl Content {
    /// Decode a JSON payload.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// A change requested by a committer, before content ids are resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Store `payload` under `key`. A new key gets `content_id` or a fresh
    /// id; an existing key keeps its id, and a mismatching `content_id`
    /// is rejected.
    Put {
        key: ContentKey,
        payload: Vec<u8>,
        content_id: Option<ContentId>,
    },
    /// Remove an existing key.
    Delete { key: ContentKey },
}

impl Operation {
    pub fn put(key: impl Into<ContentKey>, payload: impl Into<Vec<u8>>) -> Self {
        Operation::Put {
            key: key.into(),
            payload: payload.into(),
            content_id: None,
        }
    }

    /// Put with a JSON-encoded payload.
    pub fn put_json(
        key: impl Into<ContentKey>,
        value: &impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Operation::Put {
            key: key.into(),
            payload: serde_json::to_vec(value)?,
            content_id: None,
        })
    }

    pub fn delete(key: impl Into<ContentKey>) -> Self {
        Operation::Delete { key: key.into() }
    }

    /// Pin the content id of a put.
    pub fn with_content_id(self, id: ContentId) -> Self {
        match self {
            Operation::Put { key, payload, .. } => Operation::Put {
                key,
                payload,
                content_id: Some(id),
            },
            other => other,
        }
    }

    pub fn key(&self) -> &ContentKey {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

/// Source for a new reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefTarget {
    /// Copy the current head of an existing reference.
    Reference(String),
    /// Point directly at a commit.
    Commit(CommitId),
}

/// Addresses a commit for read operations.
///
/// Parsed from `name`, `name@<hex>` or `@<hex>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefSpec {
    /// Current head of a reference.
    Named(String),
    /// A commit that must be reachable from the named reference.
    NamedAt(String, CommitId),
    /// A bare commit.
    Commit(CommitId),
}

impl RefSpec {
    pub fn named(name: impl Into<String>) -> Self {
        RefSpec::Named(name.into())
    }
}

impl FromStr for RefSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            None if s.is_empty() => Err("empty reference".into()),
            None => Ok(RefSpec::Named(s.to_string())),
            Some((name, hash)) => {
                let id = CommitId::from_hex(hash)
                    .map_err(|e| format!("invalid commit hash '{}': {}", hash, e))?;
                if name.is_empty() {
                    Ok(RefSpec::Commit(id))
                } else {
                    Ok(RefSpec::NamedAt(name.to_string(), id))
                }
            }
        }
    }
}

impl From<&str> for RefSpec {
    fn from(name: &str) -> Self {
        RefSpec::Named(name.to_string())
    }
}

impl From<CommitId> for RefSpec {
    fn from(id: CommitId) -> Self {
        RefSpec::Commit(id)
    }
}

impl From<&Reference> for RefSpec {
    fn from(reference: &Reference) -> Self {
        RefSpec::NamedAt(reference.name.clone(), reference.head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let hash = Hash::from_bytes(b"hello world");
        let parsed = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_hash_shard_prefix() {
        let hash = Hash::from_bytes(b"test");
        assert_eq!(hash.shard_prefix().len(), 2);
    }

    #[test]
    fn test_key_ordering_is_per_segment() {
        let mut keys = vec![
            ContentKey::parse("b"),
            ContentKey::parse("a.b"),
            ContentKey::parse("a"),
            ContentKey::parse("a.a.z"),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["a", "a.a.z", "a.b", "b"]);
    }

    #[test]
    fn test_key_validation() {
        assert!(ContentKey::parse("db.table").validate(20, 500).is_ok());
        assert!(ContentKey::new(Vec::<String>::new()).validate(20, 500).is_err());
        assert!(ContentKey::parse("db..table").validate(20, 500).is_err());
        assert!(ContentKey::parse("a.b.c").validate(2, 500).is_err());
        assert!(ContentKey::parse("abcdef").validate(20, 5).is_err());
        assert!(ContentKey::new(["a\0b"]).validate(20, 500).is_err());
    }

    #[test]
    fn test_key_prefix() {
        let key = ContentKey::parse("db.sales.orders");
        assert!(key.starts_with(&ContentKey::parse("db.sales")));
        assert!(!key.starts_with(&ContentKey::parse("db.sal")));
    }

    #[test]
    fn test_refspec_parse() {
        let id = CommitId(Hash::from_bytes(b"c"));
        assert_eq!("main".parse::<RefSpec>().unwrap(), RefSpec::Named("main".into()));
        assert_eq!(
            format!("main@{}", id).parse::<RefSpec>().unwrap(),
            RefSpec::NamedAt("main".into(), id)
        );
        assert_eq!(format!("@{}", id).parse::<RefSpec>().unwrap(), RefSpec::Commit(id));
        assert!("main@zz".parse::<RefSpec>().is_err());
        assert!("".parse::<RefSpec>().is_err());
    }

    #[test]
    fn test_operation_put_json() {
        #[derive(Serialize)]
        struct Table {
            location: String,
        }

        let op = Operation::put_json(
            "db.orders",
            &Table {
                location: "s3://bucket/orders".into(),
            },
        )
        .unwrap();

        assert_eq!(op.key(), &ContentKey::parse("db.orders"));
        match op {
            Operation::Put { payload, content_id, .. } => {
                assert!(content_id.is_none());
                assert!(payload.starts_with(b"{"));
            }
            Operation::Delete { .. } => panic!("expected put"),
        }
    }
}
