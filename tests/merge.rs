//! Merge and transplant tests.

use refstore::{
    CommitId, CommitMeta, ConflictKind, ConflictPolicy, ContentKey, MergeMode, MergeOptions,
    Operation, RefTarget, ReferenceEvent, ReferenceKind, StoreConfig, StoreError, Timestamp,
    VersionStore,
};

fn test_store() -> VersionStore {
    VersionStore::in_memory(StoreConfig::default()).unwrap()
}

fn meta(message: &str) -> CommitMeta {
    CommitMeta::new("carol", message)
}

fn tbl() -> ContentKey {
    ContentKey::parse("tbl")
}

fn put(store: &VersionStore, branch: &str, key: &str, payload: &str) -> CommitId {
    let head = store.get_reference(branch).unwrap().head;
    store
        .commit(
            branch,
            head,
            vec![Operation::put(key, payload.as_bytes().to_vec())],
            meta(&format!("{} = {}", key, payload)),
        )
        .unwrap()
}

fn payload(store: &VersionStore, branch: &str, key: &str) -> Option<String> {
    store
        .get_value(branch, &ContentKey::parse(key))
        .unwrap()
        .map(|c| String::from_utf8(c.payload).unwrap())
}

/// `main` at M with tbl=v1, `feature` forked from M.
fn forked() -> (VersionStore, CommitId) {
    let store = test_store();
    let m = put(&store, "main", "tbl", "v1");
    store
        .create_reference("feature", ReferenceKind::Branch, RefTarget::Reference("main".into()))
        .unwrap();
    (store, m)
}

// --- Merge Scenario ---

#[test]
fn test_merge_fast_forward_safe() {
    let (store, m) = forked();
    put(&store, "feature", "tbl", "v2");

    let result = store.merge("feature", "main", &MergeOptions::default()).unwrap();

    assert!(result.was_applied);
    assert!(result.conflicts.is_empty());
    assert_eq!(result.common_ancestor, Some(m));
    assert_eq!(result.applied_keys, vec![tbl()]);
    assert_eq!(payload(&store, "main", "tbl").as_deref(), Some("v2"));

    // squash: one commit whose parent is the old head
    assert_eq!(result.created_commits.len(), 1);
    let squash = store.commits().get(&result.resulting_head).unwrap();
    assert_eq!(squash.parent, Some(m));
    assert_eq!(squash.merge_parent, result.source_head);
    assert!(squash.meta.properties.contains_key("merge-source"));
}

#[test]
fn test_merge_conflict_aborts() {
    let (store, _) = forked();
    put(&store, "feature", "tbl", "v2");
    let main_head = put(&store, "main", "tbl", "v3");

    let result = store.merge("feature", "main", &MergeOptions::default());

    match result {
        Err(StoreError::MergeConflict(conflicts)) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].key, tbl());
            assert_eq!(conflicts[0].kind, ConflictKind::ValueDiffers);
        }
        other => panic!("expected MergeConflict, got {:?}", other),
    }
    assert_eq!(store.get_reference("main").unwrap().head, main_head);
    assert_eq!(payload(&store, "main", "tbl").as_deref(), Some("v3"));
}

#[test]
fn test_same_change_on_both_sides_is_not_a_conflict() {
    let (store, _) = forked();
    put(&store, "feature", "tbl", "v2");
    put(&store, "main", "tbl", "v2");

    let result = store.merge("feature", "main", &MergeOptions::default()).unwrap();
    assert!(result.conflicts.is_empty());
    assert!(result.applied_keys.is_empty());

    // nothing to apply, but the source is still recorded as merged
    assert!(result.was_applied);
    assert_eq!(result.created_commits.len(), 1);
    let merge = store.commits().get(&result.resulting_head).unwrap();
    assert!(merge.mutations.is_empty());
    assert_eq!(merge.merge_parent, result.source_head);

    // main moves on; merging the unchanged feature again is a no-op
    put(&store, "main", "tbl", "v3");
    let again = store.merge("feature", "main", &MergeOptions::default()).unwrap();
    assert!(!again.was_applied);
    assert_eq!(payload(&store, "main", "tbl").as_deref(), Some("v3"));
}

/// Merge feature, advance both sides, merge again.
fn merge_twice(mode: MergeMode) {
    let (store, _) = forked();
    let options = MergeOptions::default().mode(mode);

    put(&store, "feature", "tbl", "v2");
    put(&store, "main", "other", "x");
    let first = store.merge("feature", "main", &options).unwrap();
    assert!(first.conflicts.is_empty());
    assert_eq!(payload(&store, "main", "tbl").as_deref(), Some("v2"));

    let feature_v3 = put(&store, "feature", "tbl", "v3");
    let second = store.merge("feature", "main", &options).unwrap();

    assert!(second.conflicts.is_empty());
    assert_eq!(second.common_ancestor, first.source_head);
    assert_eq!(second.applied_keys, vec![tbl()]);
    assert_eq!(payload(&store, "main", "tbl").as_deref(), Some("v3"));
    assert_eq!(payload(&store, "main", "other").as_deref(), Some("x"));

    let head = store.commits().get(&second.resulting_head).unwrap();
    assert_eq!(head.merge_parent, Some(feature_v3));
    assert!(store.commits().is_ancestor(&feature_v3, &second.resulting_head).unwrap());
}

#[test]
fn test_repeated_squash_merge_uses_previous_merge_as_base() {
    merge_twice(MergeMode::Squash);
}

#[test]
fn test_repeated_replay_merge_uses_previous_merge_as_base() {
    merge_twice(MergeMode::Replay);
}

#[test]
fn test_partial_merge_with_conflicts_does_not_record_source() {
    let (store, _) = forked();
    put(&store, "feature", "tbl", "v2");
    put(&store, "feature", "other", "x");
    put(&store, "main", "tbl", "v3");

    let options = MergeOptions::default().conflict_policy(ConflictPolicy::Partial);
    let result = store.merge("feature", "main", &options).unwrap();
    let head = store.commits().get(&result.resulting_head).unwrap();
    assert_eq!(head.merge_parent, None);

    // the unresolved key is reported again
    let again = store.merge("feature", "main", &options.dry_run()).unwrap();
    assert_eq!(again.conflicts.len(), 1);
    assert_eq!(again.conflicts[0].key, tbl());
}

#[test]
fn test_conflict_kinds() {
    let (store, m) = forked();

    // both add the same new key
    put(&store, "feature", "new", "f");
    put(&store, "main", "new", "m");

    // deleted on feature, modified on main
    let feature_head = store.get_reference("feature").unwrap().head;
    store
        .commit("feature", feature_head, vec![Operation::delete("tbl")], meta("drop tbl"))
        .unwrap();
    put(&store, "main", "tbl", "v3");

    let result = store
        .merge("feature", "main", &MergeOptions::default().dry_run())
        .unwrap();

    let kinds: Vec<(String, ConflictKind)> = result
        .conflicts
        .iter()
        .map(|c| (c.key.to_string(), c.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("new".to_string(), ConflictKind::KeyExists),
            ("tbl".to_string(), ConflictKind::KeyDeleted),
        ]
    );
    assert_eq!(result.common_ancestor, Some(m));
    assert!(!result.was_applied);
}

#[test]
fn test_partial_merge_applies_clean_keys() {
    let (store, _) = forked();
    put(&store, "feature", "tbl", "v2");
    put(&store, "feature", "other", "x");
    put(&store, "main", "tbl", "v3");

    let result = store
        .merge(
            "feature",
            "main",
            &MergeOptions::default().conflict_policy(ConflictPolicy::Partial),
        )
        .unwrap();

    assert!(result.was_applied);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(payload(&store, "main", "other").as_deref(), Some("x"));
    assert_eq!(payload(&store, "main", "tbl").as_deref(), Some("v3"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let (store, m) = forked();
    put(&store, "feature", "tbl", "v2");
    let events = store.subscribe_all();

    let result = store
        .merge("feature", "main", &MergeOptions::default().dry_run())
        .unwrap();

    assert_eq!(result.applied_keys, vec![tbl()]);
    assert!(!result.was_applied);
    assert_eq!(result.resulting_head, m);
    assert_eq!(store.get_reference("main").unwrap().head, m);
    assert!(events.drain().is_empty());
}

#[test]
fn test_replay_keeps_commit_metadata() {
    let (store, m) = forked();
    put(&store, "feature", "a", "1");
    put(&store, "feature", "b", "1");

    let result = store
        .merge("feature", "main", &MergeOptions::default().mode(MergeMode::Replay))
        .unwrap();

    assert_eq!(result.created_commits.len(), 2);
    let log = store.commit_log("main", Some(3)).unwrap();
    let messages: Vec<&str> = log.iter().map(|c| c.meta.message.as_str()).collect();
    assert_eq!(messages, vec!["b = 1", "a = 1", "tbl = v1"]);
    assert_eq!(log[2].id, m);
}

#[test]
fn test_merge_of_contained_source_is_noop() {
    let (store, m) = forked();
    put(&store, "main", "tbl", "v2");

    let result = store.merge("feature", "main", &MergeOptions::default()).unwrap();
    assert!(!result.was_applied);
    assert!(result.created_commits.is_empty());
    assert_eq!(result.common_ancestor, Some(m));
}

#[test]
fn test_merge_event_published() {
    let (store, _) = forked();
    put(&store, "feature", "tbl", "v2");
    let events = store.subscribe_all();

    let result = store.merge("feature", "main", &MergeOptions::default()).unwrap();

    let received = events.drain();
    assert_eq!(received.len(), 1);
    assert!(matches!(
        &received[0],
        ReferenceEvent::Merged { head, .. } if *head == result.resulting_head
    ));
}

#[test]
fn test_merge_with_custom_meta() {
    let (store, _) = forked();
    put(&store, "feature", "tbl", "v2");

    let result = store
        .merge(
            "feature",
            "main",
            &MergeOptions::default().meta(CommitMeta::new("dave", "release").with_timestamp(Timestamp(5))),
        )
        .unwrap();

    let commit = store.commits().get(&result.resulting_head).unwrap();
    assert_eq!(commit.meta.author, "dave");
    assert_eq!(commit.meta.message, "release");
}

// --- Failure Modes ---

#[test]
fn test_no_common_ancestor() {
    let store = test_store();

    let island = store
        .commits()
        .create(None, vec![], CommitMeta::new("x", "another root").with_timestamp(Timestamp(1)))
        .unwrap();
    store
        .create_reference("island", ReferenceKind::Branch, RefTarget::Commit(island))
        .unwrap();
    put(&store, "island", "a", "1");

    let result = store.merge("island", "main", &MergeOptions::default());
    assert!(matches!(result, Err(StoreError::NoCommonAncestor(_, _))));
}

#[test]
fn test_merge_into_tag_rejected() {
    let (store, m) = forked();
    store
        .create_reference("v1", ReferenceKind::Tag, RefTarget::Commit(m))
        .unwrap();
    put(&store, "feature", "tbl", "v2");

    let result = store.merge("feature", "v1", &MergeOptions::default());
    assert!(matches!(result, Err(StoreError::Validation(_))));
}

#[test]
fn test_retry_loop_on_moved_target() {
    let (store, m) = forked();
    put(&store, "feature", "tbl", "v2");

    // caller observed m, then someone else committed to main
    put(&store, "main", "other", "x");

    let stale = store.merge(
        "feature",
        "main",
        &MergeOptions::default().expected_target(m),
    );
    assert!(matches!(stale, Err(ref e) if e.is_retryable()));

    let mut attempts = 0;
    let result = loop {
        attempts += 1;
        let head = store.get_reference("main").unwrap().head;
        match store.merge("feature", "main", &MergeOptions::default().expected_target(head)) {
            Err(e) if e.is_retryable() && attempts < 5 => continue,
            other => break other.unwrap(),
        }
    };

    assert_eq!(attempts, 1);
    assert!(result.was_applied);
    assert_eq!(payload(&store, "main", "tbl").as_deref(), Some("v2"));
    assert_eq!(payload(&store, "main", "other").as_deref(), Some("x"));
}

// --- Transplant ---

#[test]
fn test_transplant_single_commit() {
    let (store, _) = forked();
    put(&store, "feature", "a", "1");
    let wanted = put(&store, "feature", "b", "1");

    let result = store
        .transplant(&[wanted], "main", &MergeOptions::default().mode(MergeMode::Replay))
        .unwrap();

    assert!(result.was_applied);
    assert_eq!(result.created_commits.len(), 1);
    assert_eq!(payload(&store, "main", "b").as_deref(), Some("1"));
    assert_eq!(payload(&store, "main", "a"), None);

    let copied = store.commits().get(&result.resulting_head).unwrap();
    assert_eq!(copied.meta.message, "b = 1");
}

#[test]
fn test_transplant_squash_conflict() {
    let (store, _) = forked();
    let change = put(&store, "feature", "tbl", "v2");
    put(&store, "main", "tbl", "v3");

    let result = store.transplant(&[change], "main", &MergeOptions::default());
    assert!(matches!(result, Err(StoreError::MergeConflict(_))));

    let partial = store
        .transplant(
            &[change],
            "main",
            &MergeOptions::default().conflict_policy(ConflictPolicy::Partial),
        )
        .unwrap();
    assert!(!partial.was_applied);
    assert_eq!(partial.conflicts.len(), 1);
}

#[test]
fn test_transplant_requires_commits() {
    let store = test_store();
    let result = store.transplant(&[], "main", &MergeOptions::default());
    assert!(matches!(result, Err(StoreError::Validation(_))));
}
