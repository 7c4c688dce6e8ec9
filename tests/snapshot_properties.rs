//! Property tests: snapshots and diffs against a naive model.

use proptest::prelude::*;
use refstore::{
    CommitMeta, ContentKey, DiffKind, DiffOptions, Operation, StoreConfig, Timestamp,
    VersionStore,
};
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Step {
    Put(u8, u8),
    Delete(u8),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0u8..8, any::<u8>()).prop_map(|(k, v)| Step::Put(k, v)),
        1 => (0u8..8).prop_map(Step::Delete),
    ]
}

fn key(k: u8) -> String {
    format!("ns.k{}", k)
}

/// Apply a chain of single-step commits and check every commit against a
/// naive replay of the steps so far.
fn run_chain(steps: &[Step], interval: u64) -> Result<(), TestCaseError> {
    let store = VersionStore::in_memory(StoreConfig {
        checkpoint_interval: interval,
        snapshot_cache_size: 2,
        ..Default::default()
    })
    .unwrap();

    let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut head = store.root_commit();
    let mut history = Vec::new();

    for (i, step) in steps.iter().enumerate() {
        let op = match step {
            Step::Put(k, v) => {
                model.insert(key(*k), vec![*v]);
                Operation::put(key(*k).as_str(), vec![*v])
            }
            Step::Delete(k) => {
                if model.remove(&key(*k)).is_none() {
                    continue;
                }
                Operation::delete(key(*k).as_str())
            }
        };
        head = store
            .commit(
                "main",
                head,
                vec![op],
                CommitMeta::new("prop", format!("step {}", i)).with_timestamp(Timestamp(i as i64)),
            )
            .unwrap();
        history.push((head, model.clone()));
    }

    // Resolve out of order so both cold walks and checkpoints get exercised
    store.resolver().clear_cache();
    for (commit, expected) in history.iter().rev() {
        let snapshot = store.get_snapshot(*commit).unwrap();
        let actual: BTreeMap<String, Vec<u8>> = snapshot
            .iter()
            .map(|(k, _)| {
                let value = store.get_value(*commit, k).unwrap().unwrap();
                (k.to_string(), value.payload)
            })
            .collect();
        prop_assert_eq!(&actual, expected);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn snapshot_matches_naive_replay(steps in prop::collection::vec(step(), 1..60)) {
        run_chain(&steps, 4)?;
    }

    #[test]
    fn snapshot_matches_without_checkpoints(steps in prop::collection::vec(step(), 1..30)) {
        run_chain(&steps, 0)?;
    }

    #[test]
    fn diff_is_symmetric(
        left in prop::collection::btree_map(0u8..10, any::<u8>(), 0..8),
        right in prop::collection::btree_map(0u8..10, any::<u8>(), 0..8),
    ) {
        let store = VersionStore::in_memory(StoreConfig::default()).unwrap();
        let root = store.root_commit();

        let ops = |m: &BTreeMap<u8, u8>| -> Vec<Operation> {
            m.iter().map(|(k, v)| Operation::put(key(*k).as_str(), vec![*v])).collect()
        };
        let a = store.commit("main", root, ops(&left), CommitMeta::new("p", "a")).unwrap();
        store.assign_reference("main", a, root).unwrap();
        let b = store.commit("main", root, ops(&right), CommitMeta::new("p", "b")).unwrap();

        let forward = store.diff(a, b, &DiffOptions::default()).unwrap();
        let backward = store.diff(b, a, &DiffOptions::default()).unwrap();

        let keys_of = |entries: &[refstore::DiffEntry], kind: DiffKind| -> Vec<ContentKey> {
            entries.iter().filter(|e| e.kind == kind).map(|e| e.key.clone()).collect()
        };
        prop_assert_eq!(keys_of(&forward, DiffKind::Added), keys_of(&backward, DiffKind::Removed));
        prop_assert_eq!(keys_of(&forward, DiffKind::Removed), keys_of(&backward, DiffKind::Added));
        prop_assert_eq!(keys_of(&forward, DiffKind::Changed), keys_of(&backward, DiffKind::Changed));

        prop_assert!(store.diff(a, a, &DiffOptions::default()).unwrap().is_empty());
    }
}
