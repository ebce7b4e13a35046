//! Lifecycle worker tests: rules applied against real objects.

mod common;

use axum::http::StatusCode;
use common::{body_bytes, header_str, test_server};
use silo_metadata::repos::{LifecycleRepo, LifecycleRuleSpec, ObjectRepo, VersionRepo};
use silo_server::workers::LifecycleWorker;
use time::OffsetDateTime;

/// Backdate one version row so age thresholds fire.
async fn backdate(server: &common::TestServer, version_id: &str, days: i64) {
    sqlx::query("UPDATE object_versions SET created_at = ? WHERE version_id = ?")
        .bind(OffsetDateTime::now_utc() - time::Duration::days(days))
        .bind(version_id)
        .execute(server.sqlite.pool())
        .await
        .unwrap();
}

async fn install_rule(server: &common::TestServer, bucket_id: i64, rule: LifecycleRuleSpec) {
    server
        .state
        .metadata
        .replace_lifecycle_rules(bucket_id, &[rule])
        .await
        .unwrap();
}

#[tokio::test]
async fn keep_newest_two_prunes_older_noncurrent_versions() {
    let server = test_server().await;

    // Five successive versions of one key, each with distinct bytes.
    let mut versions = Vec::new();
    for body in [b"v1".as_slice(), b"v2", b"v3", b"v4", b"v5"] {
        let res = server.put_object("docs", "k", body).await;
        versions.push(header_str(&res, "x-amz-version-id").unwrap().to_string());
    }
    assert_eq!(server.blob_file_count().await, 5);

    install_rule(
        &server,
        1,
        LifecycleRuleSpec {
            prefix: String::new(),
            enabled: true,
            noncurrent_newer_versions_to_keep: Some(2),
            ..Default::default()
        },
    )
    .await;

    LifecycleWorker::new(&server.state).one_pass().await;

    // Survivors: v5 (head), v4, v3. v1 and v2 are gone with their blobs.
    let remaining = server.state.metadata.list_versions(1, "k").await.unwrap();
    let ids: Vec<&str> = remaining.iter().map(|v| v.version_id.as_str()).collect();
    assert_eq!(ids, vec![&versions[4], &versions[3], &versions[2]]);
    assert_eq!(server.blob_file_count().await, 3);

    // The head still reads back the latest body.
    let res = server.get_object("docs", "k").await;
    assert_eq!(body_bytes(res).await, b"v5");
}

#[tokio::test]
async fn noncurrent_versions_expire_by_age() {
    let server = test_server().await;

    let res = server.put_object("docs", "k", b"old").await;
    let v1 = header_str(&res, "x-amz-version-id").unwrap().to_string();
    server.put_object("docs", "k", b"new").await;
    backdate(&server, &v1, 10).await;

    install_rule(
        &server,
        1,
        LifecycleRuleSpec {
            enabled: true,
            expire_noncurrent_after_days: Some(7),
            ..Default::default()
        },
    )
    .await;

    LifecycleWorker::new(&server.state).one_pass().await;

    let remaining = server.state.metadata.list_versions(1, "k").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(server.state.metadata.get_version(&v1).await.unwrap().is_none());
    assert_eq!(server.blob_file_count().await, 1);

    let res = server.get_object("docs", "k").await;
    assert_eq!(body_bytes(res).await, b"new");
}

#[tokio::test]
async fn aged_head_is_never_expired_as_noncurrent() {
    let server = test_server().await;

    // A single aged version: it is the head, so the noncurrent-age action
    // must leave it alone.
    let res = server.put_object("docs", "k", b"keep").await;
    let v1 = header_str(&res, "x-amz-version-id").unwrap().to_string();
    backdate(&server, &v1, 100).await;

    install_rule(
        &server,
        1,
        LifecycleRuleSpec {
            enabled: true,
            expire_noncurrent_after_days: Some(7),
            ..Default::default()
        },
    )
    .await;

    LifecycleWorker::new(&server.state).one_pass().await;

    let res = server.get_object("docs", "k").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_bytes(res).await, b"keep");
}

#[tokio::test]
async fn aged_delete_markers_purge_except_the_head() {
    let server = test_server().await;

    // Key "gone": soft-deleted, the marker is the head. Purging it would
    // resurrect the key, so it must stay.
    server.put_object("docs", "gone", b"x").await;
    let res = server.delete("/docs/gone").await;
    let head_marker = header_str(&res, "x-amz-version-id").unwrap().to_string();
    backdate(&server, &head_marker, 30).await;

    // Key "busy": soft-deleted then overwritten, the marker is noncurrent.
    server.put_object("docs", "busy", b"x").await;
    let res = server.delete("/docs/busy").await;
    let old_marker = header_str(&res, "x-amz-version-id").unwrap().to_string();
    server.put_object("docs", "busy", b"y").await;
    backdate(&server, &old_marker, 30).await;

    install_rule(
        &server,
        1,
        LifecycleRuleSpec {
            enabled: true,
            purge_delete_markers_after_days: Some(7),
            ..Default::default()
        },
    )
    .await;

    LifecycleWorker::new(&server.state).one_pass().await;

    // The head marker survived; the key stays shadowed.
    assert!(
        server
            .state
            .metadata
            .get_version(&head_marker)
            .await
            .unwrap()
            .is_some()
    );
    let res = server.get_object("docs", "gone").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // The noncurrent marker was purged.
    assert!(
        server
            .state
            .metadata
            .get_version(&old_marker)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn aged_heads_expire_with_their_own_threshold() {
    let server = test_server().await;

    let res = server.put_object("docs", "stale", b"x").await;
    let v1 = header_str(&res, "x-amz-version-id").unwrap().to_string();
    backdate(&server, &v1, 10).await;

    server.put_object("docs", "fresh", b"y").await;

    // Only the current-expiration threshold is set; the worker must use
    // it (and not any delete-marker threshold) for the cutoff.
    install_rule(
        &server,
        1,
        LifecycleRuleSpec {
            enabled: true,
            expire_current_after_days: Some(7),
            ..Default::default()
        },
    )
    .await;

    let worker = LifecycleWorker::new(&server.state);
    worker.one_pass().await;

    let res = server.get_object("docs", "stale").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let head = server
        .state
        .metadata
        .get_head_version(1, "stale")
        .await
        .unwrap()
        .unwrap();
    assert!(head.is_delete);

    // The fresh key is untouched.
    let res = server.get_object("docs", "fresh").await;
    assert_eq!(res.status(), StatusCode::OK);

    // A second pass does not stack further markers on the expired key.
    worker.one_pass().await;
    assert_eq!(
        server.state.metadata.list_versions(1, "stale").await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn rules_only_touch_their_prefix() {
    let server = test_server().await;

    let res = server.put_object("docs", "logs/old", b"a").await;
    let logs_old = header_str(&res, "x-amz-version-id").unwrap().to_string();
    server.put_object("docs", "logs/old", b"b").await;

    let res = server.put_object("docs", "data/old", b"c").await;
    let data_old = header_str(&res, "x-amz-version-id").unwrap().to_string();
    server.put_object("docs", "data/old", b"d").await;

    backdate(&server, &logs_old, 30).await;
    backdate(&server, &data_old, 30).await;

    install_rule(
        &server,
        1,
        LifecycleRuleSpec {
            prefix: "logs/".to_string(),
            enabled: true,
            expire_noncurrent_after_days: Some(7),
            ..Default::default()
        },
    )
    .await;

    LifecycleWorker::new(&server.state).one_pass().await;

    assert!(server.state.metadata.get_version(&logs_old).await.unwrap().is_none());
    assert!(server.state.metadata.get_version(&data_old).await.unwrap().is_some());
}

#[tokio::test]
async fn disabled_rules_do_nothing() {
    let server = test_server().await;

    let res = server.put_object("docs", "k", b"old").await;
    let v1 = header_str(&res, "x-amz-version-id").unwrap().to_string();
    server.put_object("docs", "k", b"new").await;
    backdate(&server, &v1, 30).await;

    install_rule(
        &server,
        1,
        LifecycleRuleSpec {
            enabled: false,
            expire_noncurrent_after_days: Some(7),
            ..Default::default()
        },
    )
    .await;

    LifecycleWorker::new(&server.state).one_pass().await;
    assert!(server.state.metadata.get_version(&v1).await.unwrap().is_some());
}
