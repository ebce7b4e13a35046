//! Common test fixtures: an in-process server over a temp directory.
#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use silo_core::config::AppConfig;
use silo_metadata::{MetadataStore, SqliteStore};
use silo_server::{AppState, create_router};
use silo_storage::{BlobStore, FilesystemStore};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server with anonymous auth over tempdir-backed stores.
///
/// Keeps a concrete handle to the SQLite store so tests can reach the pool
/// (e.g. to backdate timestamps for lifecycle scenarios).
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    pub sqlite: Arc<SqliteStore>,
    _temp: TempDir,
}

pub async fn test_server() -> TestServer {
    test_server_with(|_| {}).await
}

pub async fn test_server_with(tweak: impl FnOnce(&mut AppConfig)) -> TestServer {
    let temp = tempfile::tempdir().unwrap();

    let mut config = AppConfig::for_testing();
    config.storage.path = temp.path().join("blobs");
    config.metadata.path = temp.path().join("metadata.db");
    tweak(&mut config);

    let storage: Arc<dyn BlobStore> =
        Arc::new(FilesystemStore::new(&config.storage.path).await.unwrap());
    let sqlite = Arc::new(SqliteStore::new(&config.metadata.path).await.unwrap());
    let metadata: Arc<dyn MetadataStore> = sqlite.clone();

    let state = AppState::new(config, storage, metadata).unwrap();
    let router = create_router(state.clone());

    TestServer {
        router,
        state,
        sqlite,
        _temp: temp,
    }
}

impl TestServer {
    /// Send one request through the router.
    pub async fn request(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    pub async fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Response<Body> {
        self.put_object_with(bucket, key, body, &[]).await
    }

    /// PUT an object with extra request headers.
    pub async fn put_object_with(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method("PUT")
            .uri(format!("/{bucket}/{key}"));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::from(body.to_vec())).unwrap())
            .await
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Response<Body> {
        self.get_object_with(bucket, key, &[]).await
    }

    pub async fn get_object_with(
        &self,
        bucket: &str,
        key: &str,
        headers: &[(&str, &str)],
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method("GET")
            .uri(format!("/{bucket}/{key}"));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn put(&self, uri: &str, body: &[u8]) -> Response<Body> {
        self.request(
            Request::builder()
                .method("PUT")
                .uri(uri)
                .body(Body::from(body.to_vec()))
                .unwrap(),
        )
        .await
    }

    /// Create a bucket and assert success.
    pub async fn create_bucket(&self, bucket: &str) {
        let res = self.put(&format!("/{bucket}"), b"").await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    /// Number of committed blob files on disk.
    pub async fn blob_file_count(&self) -> usize {
        self.state.storage.list_blobs().await.unwrap().len()
    }
}

/// Collect a response body into bytes.
pub async fn body_bytes(res: Response<Body>) -> Vec<u8> {
    res.into_body().collect().await.unwrap().to_bytes().to_vec()
}

/// Collect a response body into a string.
pub async fn body_string(res: Response<Body>) -> String {
    String::from_utf8(body_bytes(res).await).unwrap()
}

/// Read a named response header as a string.
pub fn header_str<'a>(res: &'a Response<Body>, name: &str) -> Option<&'a str> {
    res.headers().get(name).and_then(|v| v.to_str().ok())
}
