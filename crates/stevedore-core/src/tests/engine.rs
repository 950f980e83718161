use std::collections::BTreeMap;

use chrono::Duration;

use crate::error::StevedoreError;
use crate::id::{BlobId, ContentId};
use crate::index::merge_entries;
use crate::repo::{ContentManager, ManifestStore};
use crate::storage::BlobStorage;
use crate::testutil::test_repo;

#[test]
fn write_flush_read_roundtrip() {
    let repo = test_repo();
    let id = repo.write_session(None, b"roundtrip-payload");
    assert_eq!(repo.rep.engine.read_content(&id).unwrap(), b"roundtrip-payload");
    assert_eq!(repo.count_blobs("p"), 1);
    assert_eq!(repo.count_blobs("n"), 1);
}

#[test]
fn identical_payload_dedups() {
    let repo = test_repo();
    let a = repo.write_session(None, b"same-bytes");
    let b = repo.write_session(None, b"same-bytes");
    assert_eq!(a, b);
    assert_eq!(repo.count_blobs("p"), 1, "dedup hit must not write a new pack");
}

#[test]
fn unflushed_content_is_readable() {
    let repo = test_repo();
    let id = repo.rep.engine.write_content(None, b"pending-read").unwrap();
    assert_eq!(repo.rep.engine.read_content(&id).unwrap(), b"pending-read");
    assert_eq!(repo.count_blobs("p"), 0, "pack not sealed yet");
}

#[test]
fn metadata_contents_go_to_q_packs() {
    let repo = test_repo();
    let id = repo.write_session(Some('k'), b"metadata-payload");
    assert_eq!(id.prefix(), Some('k'));
    assert_eq!(repo.count_blobs("q"), 1);
    assert_eq!(repo.count_blobs("p"), 0);
}

#[test]
fn missing_content_read_fails() {
    let repo = test_repo();
    let err = repo
        .rep
        .engine
        .read_content(&ContentId::new("0000000000"))
        .unwrap_err();
    assert!(matches!(err, StevedoreError::ContentNotFound(_)));
}

#[test]
fn missing_pack_is_an_integrity_error() {
    let repo = test_repo();
    let id = repo.write_session(None, b"vanishing-pack");

    let pack = repo.storage.list("p").unwrap().remove(0).id;
    repo.storage.delete(&pack).unwrap();

    let err = repo.rep.engine.read_content(&id).unwrap_err();
    assert!(matches!(err, StevedoreError::Integrity(_)));
}

#[test]
fn rewrite_content_moves_location_and_keeps_bytes() {
    let repo = test_repo();
    let id = repo.write_session(None, b"relocated-payload");
    let old_entry = merge_entries(repo.rep.engine.iter_contents().unwrap())[&id].clone();

    repo.clock.advance(Duration::hours(1));
    repo.rep.engine.rewrite_content(&id).unwrap();
    repo.rep.engine.flush().unwrap();

    let new_entry = merge_entries(repo.rep.engine.iter_contents().unwrap())[&id].clone();
    assert_ne!(new_entry.pack_blob_id, old_entry.pack_blob_id);
    assert!(new_entry.timestamp > old_entry.timestamp);
    assert_eq!(repo.rep.engine.read_content(&id).unwrap(), b"relocated-payload");
}

#[test]
fn rewrite_index_replaces_old_index_blobs() {
    let repo = test_repo();
    repo.write_session(None, b"index-a");
    repo.write_session(None, b"index-b");
    assert_eq!(repo.count_blobs("n"), 2);

    let merged: Vec<_> = merge_entries(repo.rep.engine.iter_contents().unwrap())
        .into_values()
        .collect();
    repo.rep.engine.rewrite_index(&merged).unwrap();

    assert_eq!(repo.count_blobs("n"), 1, "old index generations must be retired");
    assert_eq!(repo.rep.engine.iter_contents().unwrap().len(), 2);
}

#[test]
fn large_session_seals_packs_at_target_size() {
    let repo = test_repo();
    // each payload is ~a third of the 1 MiB test target; four of them must
    // overflow into a second pack
    for i in 0..4u8 {
        let payload = vec![i; 350 * 1024];
        repo.rep.engine.write_content(None, &payload).unwrap();
    }
    repo.rep.engine.flush().unwrap();
    assert!(repo.count_blobs("p") >= 2, "oversized sessions must split packs");
}

#[test]
fn manifest_store_roundtrip() {
    let repo = test_repo();
    let store: &dyn ManifestStore = &repo.rep.engine;

    let mut labels = BTreeMap::new();
    labels.insert("type".to_string(), "snapshot".to_string());
    labels.insert("host".to_string(), "alpha".to_string());

    let payload = serde_json::json!({"name": "first", "count": 3});
    let id = store.put_manifest(&labels, &payload).unwrap();

    assert_eq!(store.get_manifest(&id).unwrap().unwrap(), payload);

    // filter match on a label subset
    let mut filter = BTreeMap::new();
    filter.insert("type".to_string(), "snapshot".to_string());
    let found = store.find_manifests(&filter).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);
    assert_eq!(found[0].labels["host"], "alpha");

    // non-matching filter
    filter.insert("host".to_string(), "beta".to_string());
    assert!(store.find_manifests(&filter).unwrap().is_empty());

    store.delete_manifest(&id).unwrap();
    assert!(store.get_manifest(&id).unwrap().is_none());
    // idempotent delete
    store.delete_manifest(&id).unwrap();
}

#[test]
fn deleting_missing_content_fails() {
    let repo = test_repo();
    let err = repo
        .rep
        .engine
        .delete_content(&ContentId::new("0000000000"))
        .unwrap_err();
    assert!(matches!(err, StevedoreError::ContentNotFound(_)));
}

#[test]
fn tombstone_keeps_pack_location() {
    let repo = test_repo();
    let id = repo.write_session(None, b"to-be-deleted");
    let pack: BlobId = merge_entries(repo.rep.engine.iter_contents().unwrap())[&id]
        .pack_blob_id
        .clone();

    repo.clock.advance(Duration::hours(1));
    repo.rep.engine.delete_content(&id).unwrap();
    repo.rep.engine.flush().unwrap();

    let entry = merge_entries(repo.rep.engine.iter_contents().unwrap())[&id].clone();
    assert!(entry.deleted);
    assert_eq!(entry.pack_blob_id, pack, "tombstone must keep pinning its pack");
}
