//! Metadata composite-operation tests against the concrete SQLite store.

use silo_core::checksum::ContentHash;
use silo_metadata::repos::{
    BlobRepo, BucketRepo, IdempotencyRepo, ObjectRepo, Prune, PutCommit, PutOutcome, UserRepo,
    VersionRepo,
};
use silo_metadata::{MetadataError, SqliteStore};
use time::OffsetDateTime;

async fn store() -> (tempfile::TempDir, SqliteStore) {
    let temp = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(temp.path().join("metadata.db")).await.unwrap();
    (temp, store)
}

async fn put(
    store: &SqliteStore,
    bucket_id: i64,
    key: &str,
    body: &[u8],
    idem: Option<&str>,
) -> PutOutcome {
    let hash = ContentHash::compute(body);
    store
        .commit_put(PutCommit {
            bucket_id,
            key: key.to_string(),
            staged_blob_id: silo_core::id::new_blob_id(),
            checksum: hash.checksum(),
            size: body.len() as i64,
            etag: hash.etag(),
            content_type: "application/octet-stream".to_string(),
            idempotency_key: idem.map(str::to_string),
        })
        .await
        .unwrap()
}

fn committed(outcome: PutOutcome) -> (String, String, bool) {
    match outcome {
        PutOutcome::Committed {
            version_id,
            blob_id,
            deduped,
            ..
        } => (version_id, blob_id, deduped),
        PutOutcome::Replayed { .. } => panic!("expected a committed put"),
    }
}

/// Backdate one version row for age-based assertions.
async fn backdate(store: &SqliteStore, version_id: &str, days: i64) {
    sqlx::query("UPDATE object_versions SET created_at = ? WHERE version_id = ?")
        .bind(OffsetDateTime::now_utc() - time::Duration::days(days))
        .bind(version_id)
        .execute(store.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn commit_put_dedups_identical_checksums() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();

    let (v1, blob1, deduped1) = committed(put(&store, bucket, "a", b"X", None).await);
    let (v2, blob2, deduped2) = committed(put(&store, bucket, "c", b"X", None).await);

    assert!(!deduped1);
    assert!(deduped2, "second identical body must adopt the ready blob");
    assert_eq!(blob1, blob2);
    assert_ne!(v1, v2);

    assert_eq!(store.count_blob_references(&blob1).await.unwrap(), 2);
}

#[tokio::test]
async fn commit_put_replays_idempotency_token() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();

    let (v1, _, _) = committed(put(&store, bucket, "k", b"A", Some("tok")).await);

    match put(&store, bucket, "k", b"B", Some("tok")).await {
        PutOutcome::Replayed { version_id, etag } => {
            assert_eq!(version_id, v1);
            assert_eq!(etag, ContentHash::compute(b"A").etag());
        }
        PutOutcome::Committed { .. } => panic!("token replay must not commit"),
    }

    // The record is immutable and queryable.
    let record = store.get_idempotency(bucket, "k", "tok").await.unwrap().unwrap();
    assert_eq!(record.version_id, v1);
    assert_eq!(store.list_versions(bucket, "k").await.unwrap().len(), 1);
}

#[tokio::test]
async fn head_follows_latest_put() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();

    put(&store, bucket, "k", b"one", None).await;
    let (v2, _, _) = committed(put(&store, bucket, "k", b"two", None).await);

    let head = store.get_head_version(bucket, "k").await.unwrap().unwrap();
    assert_eq!(head.version_id, v2);
    assert_eq!(store.list_versions(bucket, "k").await.unwrap().len(), 2);
}

#[tokio::test]
async fn soft_delete_shadows_head() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();
    put(&store, bucket, "k", b"x", None).await;

    let marker = store.soft_delete_object(bucket, "k").await.unwrap();
    let head = store.get_head_version(bucket, "k").await.unwrap().unwrap();
    assert_eq!(head.version_id, marker);
    assert!(head.is_delete);
    assert!(head.blob_id.is_none());
}

#[tokio::test]
async fn versioned_delete_of_head_rewires_to_previous() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();

    let (v1, blob1, _) = committed(put(&store, bucket, "k", b"one", None).await);
    let (v2, blob2, _) = committed(put(&store, bucket, "k", b"two", None).await);

    let result = store.delete_version_permanent(bucket, "k", &v2).await.unwrap();
    assert_eq!(result.removed_blob_id.as_deref(), Some(blob2.as_str()));

    let head = store.get_head_version(bucket, "k").await.unwrap().unwrap();
    assert_eq!(head.version_id, v1);
    assert!(store.get_blob(&blob1).await.unwrap().is_some());
    assert!(store.get_blob(&blob2).await.unwrap().is_none());
}

#[tokio::test]
async fn versioned_delete_of_noncurrent_keeps_head() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();

    let (v1, _, _) = committed(put(&store, bucket, "k", b"one", None).await);
    let (v2, _, _) = committed(put(&store, bucket, "k", b"two", None).await);

    store.delete_version_permanent(bucket, "k", &v1).await.unwrap();
    let head = store.get_head_version(bucket, "k").await.unwrap().unwrap();
    assert_eq!(head.version_id, v2);
}

#[tokio::test]
async fn deleting_last_version_installs_marker() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();
    let (v1, blob1, _) = committed(put(&store, bucket, "k", b"only", None).await);

    let result = store.delete_version_permanent(bucket, "k", &v1).await.unwrap();
    assert_eq!(result.removed_blob_id.as_deref(), Some(blob1.as_str()));

    // The head pointer still resolves, to a fresh marker.
    let head = store.get_head_version(bucket, "k").await.unwrap().unwrap();
    assert!(head.is_delete);
}

#[tokio::test]
async fn delete_unknown_version_is_not_found() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();
    put(&store, bucket, "k", b"x", None).await;

    let err = store
        .delete_version_permanent(bucket, "k", "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)));
}

#[tokio::test]
async fn shared_blob_survives_until_last_reference() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();

    let (va, blob, _) = committed(put(&store, bucket, "a", b"shared", None).await);
    let (vb, _, _) = committed(put(&store, bucket, "b", b"shared", None).await);

    let result = store.delete_version_permanent(bucket, "a", &va).await.unwrap();
    assert!(result.removed_blob_id.is_none(), "blob still referenced by b");
    assert!(store.get_blob(&blob).await.unwrap().is_some());

    let result = store.delete_version_permanent(bucket, "b", &vb).await.unwrap();
    assert_eq!(result.removed_blob_id.as_deref(), Some(blob.as_str()));
}

#[tokio::test]
async fn prune_version_skips_the_head() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();
    let (v1, _, _) = committed(put(&store, bucket, "k", b"x", None).await);

    match store.prune_version(bucket, "k", &v1).await.unwrap() {
        Prune::Skipped => {}
        Prune::Pruned { .. } => panic!("must never prune the head"),
    }
    assert!(store.get_head_version(bucket, "k").await.unwrap().is_some());

    // Pruning a vanished version is an idempotent no-op.
    match store.prune_version(bucket, "k", "gone").await.unwrap() {
        Prune::Skipped => {}
        Prune::Pruned { .. } => panic!("nothing to prune"),
    }
}

#[tokio::test]
async fn purge_delete_marker_never_removes_head() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();
    put(&store, bucket, "k", b"x", None).await;

    // Marker as head: refuse.
    let marker = store.soft_delete_object(bucket, "k").await.unwrap();
    assert!(!store.purge_delete_marker(bucket, "k", &marker).await.unwrap());
    assert!(store.get_version(&marker).await.unwrap().is_some());

    // A newer PUT demotes the marker; now it purges.
    put(&store, bucket, "k", b"y", None).await;
    assert!(store.purge_delete_marker(bucket, "k", &marker).await.unwrap());
    assert!(store.get_version(&marker).await.unwrap().is_none());
}

#[tokio::test]
async fn expire_current_marks_live_heads_only() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();
    put(&store, bucket, "k", b"x", None).await;

    let marker = store.expire_current_object(bucket, "k").await.unwrap();
    assert!(marker.is_some());

    // Already shadowed: a second expiration is a no-op.
    assert!(store.expire_current_object(bucket, "k").await.unwrap().is_none());
    assert_eq!(store.list_versions(bucket, "k").await.unwrap().len(), 2);
}

#[tokio::test]
async fn noncurrent_listings_exclude_head_and_respect_age() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();

    let (v1, _, _) = committed(put(&store, bucket, "k", b"one", None).await);
    let (v2, _, _) = committed(put(&store, bucket, "k", b"two", None).await);
    backdate(&store, &v1, 10).await;
    backdate(&store, &v2, 10).await;

    let cutoff = OffsetDateTime::now_utc() - time::Duration::days(7);
    let aged = store
        .list_noncurrent_by_age(bucket, "", cutoff, 100)
        .await
        .unwrap();
    // v2 is the head; only v1 is noncurrent.
    assert_eq!(aged.len(), 1);
    assert_eq!(aged[0].version_id, v1);
}

#[tokio::test]
async fn keep_newest_listing_returns_excess_oldest() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();

    let mut versions = Vec::new();
    for body in [b"v1".as_slice(), b"v2", b"v3", b"v4", b"v5"] {
        let (vid, _, _) = committed(put(&store, bucket, "k", body, None).await);
        versions.push(vid);
    }

    // Head is v5; noncurrent are v4..v1. Keeping 2 exposes v2 and v1.
    let excess = store
        .list_noncurrent_beyond_newest(bucket, "", 2, 100)
        .await
        .unwrap();
    let excess_ids: Vec<&str> = excess.iter().map(|v| v.version_id.as_str()).collect();
    assert_eq!(excess_ids, vec![versions[1].as_str(), versions[0].as_str()]);

    // Pruning them leaves exactly keep=2 noncurrent versions.
    for version in &excess {
        match store
            .prune_version(bucket, "k", &version.version_id)
            .await
            .unwrap()
        {
            Prune::Pruned { .. } => {}
            Prune::Skipped => panic!("excess versions must prune"),
        }
    }
    let remaining = store.list_versions(bucket, "k").await.unwrap();
    assert_eq!(remaining.len(), 3);
    assert!(
        store
            .list_noncurrent_beyond_newest(bucket, "", 2, 100)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn list_head_page_orders_and_seeks() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();
    for key in ["b", "a", "c/inner", "c!"] {
        put(&store, bucket, key, b"x", None).await;
    }

    let page = store
        .list_head_page(&silo_metadata::repos::ListHeadPage {
            bucket_id: bucket,
            prefix: String::new(),
            after_key: String::new(),
            limit: 10,
        })
        .await
        .unwrap();
    let keys: Vec<&str> = page.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c!", "c/inner"]);

    let page = store
        .list_head_page(&silo_metadata::repos::ListHeadPage {
            bucket_id: bucket,
            prefix: String::new(),
            after_key: "b".to_string(),
            limit: 10,
        })
        .await
        .unwrap();
    let keys: Vec<&str> = page.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["c!", "c/inner"]);
}

#[tokio::test]
async fn buckets_are_scoped_to_owners() {
    let (_temp, store) = store().await;
    let id = store.ensure_bucket("b", 7).await.unwrap();

    assert_eq!(store.bucket_id_by_name("b", 7).await.unwrap(), Some(id));
    assert_eq!(store.bucket_id_by_name("b", 8).await.unwrap(), None);

    // ensure_bucket is idempotent per name.
    assert_eq!(store.ensure_bucket("b", 7).await.unwrap(), id);

    let owned = store.list_buckets(7).await.unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].name, "b");
}

#[tokio::test]
async fn bucket_delete_requires_empty() {
    let (_temp, store) = store().await;
    let bucket = store.ensure_bucket("b", 1).await.unwrap();
    put(&store, bucket, "k", b"x", None).await;

    let err = store.delete_bucket_if_empty(bucket).await.unwrap_err();
    assert!(matches!(err, MetadataError::BucketNotEmpty));

    let empty = store.ensure_bucket("empty", 1).await.unwrap();
    store.delete_bucket_if_empty(empty).await.unwrap();
    assert_eq!(store.bucket_id_by_name("empty", 1).await.unwrap(), None);
}

#[tokio::test]
async fn users_roundtrip() {
    let (_temp, store) = store().await;
    let id = store.ensure_user("AKIATEST", "secret").await.unwrap();
    assert_eq!(store.ensure_user("AKIATEST", "ignored").await.unwrap(), id);

    let user = store.find_user_by_access_key("AKIATEST").await.unwrap().unwrap();
    assert_eq!(user.id, id);
    assert_eq!(user.secret_access_key, "secret");
    assert!(store.find_user_by_access_key("AKIAOTHER").await.unwrap().is_none());
}
