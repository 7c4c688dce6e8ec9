//! Key-level differences between two commits.

use crate::error::Result;
use crate::snapshot::{Snapshot, SnapshotResolver};
use crate::types::{CommitId, ContentEntry, ContentKey};
use std::cmp::Ordering;
use std::iter::Peekable;
use std::sync::Arc;

/// How a key differs between the `from` and `to` side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiffKind {
    /// Only present on the `to` side.
    Added,
    /// Only present on the `from` side.
    Removed,
    /// Present on both sides with different content hashes.
    Changed,
    /// Present on both sides with the same content hash.
    Unchanged,
}

/// One key's difference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub key: ContentKey,
    pub kind: DiffKind,
    pub from: Option<ContentEntry>,
    pub to: Option<ContentEntry>,
}

/// Diff options.
#[derive(Clone, Debug, Default)]
pub struct DiffOptions {
    /// Emit [`DiffKind::Unchanged`] entries too.
    pub include_unchanged: bool,
    /// Only compare keys under this prefix.
    pub prefix: Option<ContentKey>,
}

impl DiffOptions {
    pub fn include_unchanged(mut self) -> Self {
        self.include_unchanged = true;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<ContentKey>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Merge-join two snapshots in key order.
///
/// Output is sorted by key and depends only on the two mappings, never on how
/// they were resolved.
pub fn diff_snapshots(from: &Snapshot, to: &Snapshot, options: &DiffOptions) -> Vec<DiffEntry> {
    match &options.prefix {
        Some(prefix) => merge_join(
            from.with_prefix(prefix).peekable(),
            to.with_prefix(prefix).peekable(),
            options.include_unchanged,
        ),
        None => merge_join(
            from.iter().peekable(),
            to.iter().peekable(),
            options.include_unchanged,
        ),
    }
}

fn merge_join<'a, L, R>(
    mut left: Peekable<L>,
    mut right: Peekable<R>,
    include_unchanged: bool,
) -> Vec<DiffEntry>
where
    L: Iterator<Item = (&'a ContentKey, &'a ContentEntry)>,
    R: Iterator<Item = (&'a ContentKey, &'a ContentEntry)>,
{
    let mut out = Vec::new();

    loop {
        let order = match (left.peek(), right.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((lk, _)), Some((rk, _))) => lk.cmp(rk),
        };

        match order {
            Ordering::Less => {
                if let Some((key, entry)) = left.next() {
                    out.push(DiffEntry {
                        key: key.clone(),
                        kind: DiffKind::Removed,
                        from: Some(entry.clone()),
                        to: None,
                    });
                }
            }
            Ordering::Greater => {
                if let Some((key, entry)) = right.next() {
                    out.push(DiffEntry {
                        key: key.clone(),
                        kind: DiffKind::Added,
                        from: None,
                        to: Some(entry.clone()),
                    });
                }
            }
            Ordering::Equal => {
                if let (Some((key, from)), Some((_, to))) = (left.next(), right.next()) {
                    let kind = if from.hash == to.hash {
                        DiffKind::Unchanged
                    } else {
                        DiffKind::Changed
                    };
                    if kind != DiffKind::Unchanged || include_unchanged {
                        out.push(DiffEntry {
                            key: key.clone(),
                            kind,
                            from: Some(from.clone()),
                            to: Some(to.clone()),
                        });
                    }
                }
            }
        }
    }

    out
}

/// Computes diffs between commits via the snapshot resolver.
pub struct DiffEngine {
    resolver: Arc<SnapshotResolver>,
}

impl DiffEngine {
    pub fn new(resolver: Arc<SnapshotResolver>) -> Self {
        Self { resolver }
    }

    /// Differences going from `from` to `to`.
    pub fn diff(&self, from: &CommitId, to: &CommitId, options: &DiffOptions) -> Result<Vec<DiffEntry>> {
        if from == to && !options.include_unchanged {
            return Ok(Vec::new());
        }
        let from = self.resolver.resolve(from)?;
        let to = self.resolver.resolve(to)?;
        Ok(diff_snapshots(&from, &to, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentHash, ContentId, Hash};
    use std::collections::BTreeMap;

    fn snapshot(entries: &[(&str, &str)]) -> Snapshot {
        let map: BTreeMap<ContentKey, ContentEntry> = entries
            .iter()
            .map(|(k, v)| {
                (
                    ContentKey::parse(k),
                    ContentEntry {
                        id: ContentId::new(*k),
                        hash: ContentHash::of(v.as_bytes()),
                    },
                )
            })
            .collect();
        Snapshot::new(CommitId(Hash::from_bytes(b"x")), map)
    }

    fn kinds(entries: &[DiffEntry]) -> Vec<(String, DiffKind)> {
        entries.iter().map(|e| (e.key.to_string(), e.kind)).collect()
    }

    #[test]
    fn test_diff_kinds_in_key_order() {
        let from = snapshot(&[("a", "1"), ("b", "1"), ("d", "1")]);
        let to = snapshot(&[("b", "2"), ("c", "1"), ("d", "1")]);

        let diff = diff_snapshots(&from, &to, &DiffOptions::default());
        assert_eq!(
            kinds(&diff),
            vec![
                ("a".to_string(), DiffKind::Removed),
                ("b".to_string(), DiffKind::Changed),
                ("c".to_string(), DiffKind::Added),
            ]
        );
        assert_eq!(diff[1].from.as_ref().unwrap().hash, ContentHash::of(b"1"));
        assert_eq!(diff[1].to.as_ref().unwrap().hash, ContentHash::of(b"2"));
    }

    #[test]
    fn test_unchanged_on_request() {
        let from = snapshot(&[("a", "1"), ("b", "1")]);
        let to = snapshot(&[("a", "1"), ("b", "2")]);

        let diff = diff_snapshots(&from, &to, &DiffOptions::default().include_unchanged());
        assert_eq!(
            kinds(&diff),
            vec![
                ("a".to_string(), DiffKind::Unchanged),
                ("b".to_string(), DiffKind::Changed),
            ]
        );
    }

    #[test]
    fn test_prefix_filter() {
        let from = snapshot(&[("db.a", "1"), ("other", "1")]);
        let to = snapshot(&[("db.b", "1"), ("other", "2")]);

        let diff = diff_snapshots(&from, &to, &DiffOptions::default().with_prefix("db"));
        assert_eq!(
            kinds(&diff),
            vec![
                ("db.a".to_string(), DiffKind::Removed),
                ("db.b".to_string(), DiffKind::Added),
            ]
        );
    }

    #[test]
    fn test_self_diff_is_empty() {
        let s = snapshot(&[("a", "1")]);
        assert!(diff_snapshots(&s, &s, &DiffOptions::default()).is_empty());
    }
}
