use jobtrack_store::cache::store::CacheOp;
use jobtrack_store::cache::{CacheKey, CacheStore, Keyspace};
use jobtrack_store::AppError;

fn open_temp() -> (tempfile::TempDir, CacheStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CacheStore::open(&dir.path().join("cache")).expect("open cache");
    (dir, store)
}

#[test]
fn new_cache_is_empty() {
    let (_dir, store) = open_temp();
    assert!(store.is_empty().expect("is_empty"));
    assert!(store.path().ends_with("cache/cache.redb"));
}

#[test]
fn mixed_batch_applies_in_order() {
    let (_dir, store) = open_temp();
    let job = CacheKey::entity(Keyspace::Job, "alice", 3);
    let tomb = CacheKey::tombstone(Keyspace::Job, "alice", 3);
    let view = CacheKey::list(Keyspace::Jobs, "alice", None);
    store.put(&tomb, &[1]).expect("tombstone");
    store.put(&view, b"[]").expect("view");

    let removed = store
        .apply(vec![
            CacheOp::Put(job.clone(), b"{}".to_vec()),
            CacheOp::Remove(tomb.clone()),
            CacheOp::RemovePrefix(CacheKey::family_prefix(Keyspace::Jobs, "alice")),
            CacheOp::Put(CacheKey::meta("alice", "dirty"), vec![1]),
        ])
        .expect("apply");

    assert_eq!(removed, 2);
    assert!(store.contains(&job).expect("job"));
    assert!(!store.contains(&tomb).expect("tomb"));
    assert!(!store.contains(&view).expect("view"));
    assert!(store
        .contains(&CacheKey::meta("alice", "dirty"))
        .expect("dirty"));
}

#[test]
fn put_after_remove_in_one_batch_wins() {
    let (_dir, store) = open_temp();
    let key = CacheKey::entity(Keyspace::Company, "alice", 1);

    store
        .apply(vec![
            CacheOp::Remove(key.clone()),
            CacheOp::Put(key.clone(), b"\"kept\"".to_vec()),
        ])
        .expect("apply");

    let value: Option<String> = store.get_json(&key).expect("get");
    assert_eq!(value.as_deref(), Some("kept"));
}

#[test]
fn scan_prefix_returns_only_the_entity_family() {
    let (_dir, store) = open_temp();
    for id in [1, 2, 10] {
        store
            .put(&CacheKey::entity(Keyspace::Job, "alice", id), b"{}")
            .expect("put job");
    }
    store
        .put(&CacheKey::list(Keyspace::Jobs, "alice", None), b"[]")
        .expect("put view");
    store
        .put(&CacheKey::tombstone(Keyspace::Job, "alice", 4), &[1])
        .expect("put tombstone");

    let keys = store
        .keys_with_prefix(&CacheKey::family_prefix(Keyspace::Job, "alice"))
        .expect("keys");
    assert_eq!(keys, vec!["job:alice:1", "job:alice:10", "job:alice:2"]);
}

#[test]
fn undecodable_value_is_a_codec_error() {
    let (_dir, store) = open_temp();
    let key = CacheKey::singleton(Keyspace::Profile, "alice");
    store.put(&key, b"{not json").expect("put");

    let err = store.get_json::<Vec<String>>(&key).expect_err("bad payload");
    assert!(matches!(err, AppError::Codec(_)), "got {err}");
}
