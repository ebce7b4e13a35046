//! Blob GC worker tests.

mod common;

use axum::http::StatusCode;
use bytes::Bytes;
use common::{body_bytes, test_server, test_server_with};
use silo_metadata::repos::{BlobRepo, ObjectRepo};
use silo_server::workers::GcWorker;
use silo_storage::{BlobStore, WriteHint};

/// Write committed bytes with no metadata record, simulating a crash
/// between blob-store commit and the metadata transaction.
async fn orphan_bytes(server: &common::TestServer, data: &[u8]) -> String {
    let id = silo_core::id::new_blob_id();
    let mut session = server
        .state
        .storage
        .begin_write(&id, WriteHint::default())
        .await
        .unwrap();
    session.write(Bytes::copy_from_slice(data)).await.unwrap();
    session.commit().await.unwrap();
    id
}

#[tokio::test]
async fn referenced_blobs_are_never_collected() {
    let server = test_server().await;
    server.put_object("docs", "k", b"payload").await;

    GcWorker::new(&server.state).one_pass().await;

    assert_eq!(server.blob_file_count().await, 1);
    let res = server.get_object("docs", "k").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, b"payload");
}

#[tokio::test]
async fn unreferenced_ready_blob_is_reclaimed() {
    let server = test_server().await;
    server.put_object("docs", "k", b"payload").await;

    // Sever the version's blob reference directly, leaving a ready blob
    // record with a refcount of zero for the sweep to find.
    let head = server
        .state
        .metadata
        .get_head_version(1, "k")
        .await
        .unwrap()
        .unwrap();
    let blob_id = head.blob_id.unwrap();
    sqlx::query("DELETE FROM object_versions WHERE version_id = ?")
        .bind(&head.version_id)
        .execute(server.sqlite.pool())
        .await
        .unwrap();

    GcWorker::new(&server.state).one_pass().await;

    assert!(server.state.metadata.get_blob(&blob_id).await.unwrap().is_none());
    assert_eq!(server.blob_file_count().await, 0);
}

#[tokio::test]
async fn gc_pass_is_idempotent() {
    let server = test_server().await;
    server.put_object("docs", "k", b"payload").await;
    let head = server
        .state
        .metadata
        .get_head_version(1, "k")
        .await
        .unwrap()
        .unwrap();
    sqlx::query("DELETE FROM object_versions WHERE version_id = ?")
        .bind(&head.version_id)
        .execute(server.sqlite.pool())
        .await
        .unwrap();

    let worker = GcWorker::new(&server.state);
    worker.one_pass().await;
    // Nothing left; a second pass finds no candidates and no orphans.
    worker.one_pass().await;
    assert_eq!(server.blob_file_count().await, 0);
}

#[tokio::test]
async fn orphan_files_swept_after_grace_period() {
    let server = test_server_with(|config| {
        config.gc.orphan_grace_secs = 0;
    })
    .await;

    let orphan = orphan_bytes(&server, b"crashed upload").await;
    assert_eq!(server.blob_file_count().await, 1);

    // Give the zero grace period a moment to lapse.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    GcWorker::new(&server.state).one_pass().await;

    assert_eq!(server.blob_file_count().await, 0);
    assert!(server.state.storage.stat(&orphan).await.unwrap().is_none());
}

#[tokio::test]
async fn fresh_files_survive_the_orphan_sweep() {
    // Default grace period (1 hour): a just-committed file with no record
    // yet must not be touched.
    let server = test_server().await;
    let orphan = orphan_bytes(&server, b"in-flight").await;

    GcWorker::new(&server.state).one_pass().await;

    assert!(server.state.storage.stat(&orphan).await.unwrap().is_some());
}

#[tokio::test]
async fn orphan_sweep_spares_recorded_blobs() {
    let server = test_server_with(|config| {
        config.gc.orphan_grace_secs = 0;
    })
    .await;
    server.put_object("docs", "k", b"kept").await;

    // Backdate nothing; even with zero grace the blob has a record.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    GcWorker::new(&server.state).one_pass().await;

    assert_eq!(server.blob_file_count().await, 1);
    let res = server.get_object("docs", "k").await;
    assert_eq!(body_bytes(res).await, b"kept");
}

#[tokio::test]
async fn record_sweep_completes_when_bytes_already_gone() {
    // A blob whose record exists but whose bytes were already removed:
    // the sweep deletes the record via the idempotent byte delete.
    let server = test_server().await;
    server.put_object("docs", "k", b"payload").await;
    let head = server
        .state
        .metadata
        .get_head_version(1, "k")
        .await
        .unwrap()
        .unwrap();
    let blob_id = head.blob_id.unwrap();
    sqlx::query("DELETE FROM object_versions WHERE version_id = ?")
        .bind(&head.version_id)
        .execute(server.sqlite.pool())
        .await
        .unwrap();
    server.state.storage.delete(&blob_id).await.unwrap();

    GcWorker::new(&server.state).one_pass().await;
    assert!(server.state.metadata.get_blob(&blob_id).await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_every_version_then_gc_leaves_nothing() {
    let server = test_server().await;

    let res = server.put_object("docs", "k", b"data").await;
    let v1 = common::header_str(&res, "x-amz-version-id").unwrap().to_string();
    let res = server.delete(&format!("/docs/k?versionId={v1}")).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // The delete path already reclaimed the blob; GC finds a clean state.
    GcWorker::new(&server.state).one_pass().await;
    assert_eq!(server.blob_file_count().await, 0);
}

#[tokio::test]
async fn dedup_hit_never_races_gc_candidate_listing() {
    let server = test_server().await;

    // Two keys share a blob; removing one reference leaves a live one, so
    // the blob is not a candidate and survives the pass.
    server.put_object("docs", "a", b"shared").await;
    let res = server.put_object("docs", "b", b"shared").await;
    let vb = common::header_str(&res, "x-amz-version-id").unwrap().to_string();
    server.delete(&format!("/docs/b?versionId={vb}")).await;

    GcWorker::new(&server.state).one_pass().await;

    assert_eq!(server.blob_file_count().await, 1);
    let res = server.get_object("docs", "a").await;
    assert_eq!(body_bytes(res).await, b"shared");
}
