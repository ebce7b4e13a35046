//! Bucket-level handlers: service listing, create/delete, and dispatch to
//! the lifecycle and listing sub-resources.

use crate::auth::CallerId;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{lifecycle, list};
use crate::s3xml::{self, BucketEntry};
use crate::state::AppState;
use axum::Extension;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use silo_metadata::MetadataError;
use silo_metadata::repos::BucketRepo;

/// Query parameters recognized on bucket-level requests.
#[derive(Debug, Default, Deserialize)]
pub struct BucketQuery {
    /// Present (possibly empty) on `?lifecycle` sub-resource requests.
    pub lifecycle: Option<String>,
    #[serde(rename = "list-type")]
    pub list_type: Option<String>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

/// `GET /` — list buckets owned by the caller.
pub async fn list_buckets(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerId>,
) -> ApiResult<Response> {
    let buckets = state.metadata.list_buckets(caller.0).await?;
    let entries: Vec<BucketEntry> = buckets
        .into_iter()
        .map(|b| BucketEntry {
            name: b.name,
            created_at: b.created_at,
        })
        .collect();

    let doc = s3xml::list_all_my_buckets(&caller.0.to_string(), "local", &entries)
        .map_err(|e| ApiError::Internal(format!("render listing: {e}")))?;
    tracing::debug!(count = entries.len(), "listed buckets");
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        doc,
    )
        .into_response())
}

/// `GET /{bucket}` — dispatch to lifecycle read or ListObjectsV2.
pub async fn bucket_get(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketQuery>,
    Extension(caller): Extension<CallerId>,
) -> ApiResult<Response> {
    if query.lifecycle.is_some() {
        return lifecycle::get_bucket_lifecycle(&state, caller, &bucket).await;
    }
    if query.list_type.as_deref() == Some("2") {
        return list::list_objects_v2(&state, caller, &bucket, &query).await;
    }
    Err(ApiError::NotImplemented(
        "ListObjects is not implemented; use list-type=2".to_string(),
    ))
}

/// `PUT /{bucket}` — create bucket (idempotent) or replace its lifecycle
/// policy.
pub async fn bucket_put(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketQuery>,
    Extension(caller): Extension<CallerId>,
    body: Bytes,
) -> ApiResult<Response> {
    if query.lifecycle.is_some() {
        return lifecycle::put_bucket_lifecycle(&state, caller, &bucket, &body).await;
    }

    silo_core::validate::bucket_name(&bucket)
        .map_err(|e| ApiError::InvalidBucketName(e.to_string()))?;
    let bucket_id = state.metadata.ensure_bucket(&bucket, caller.0).await?;
    tracing::info!(bucket, bucket_id, "bucket ensured");

    Ok((
        StatusCode::OK,
        [
            (header::LOCATION, format!("/{bucket}")),
            (header::CONTENT_TYPE, "application/xml".to_string()),
        ],
    )
        .into_response())
}

/// `DELETE /{bucket}` — delete an empty bucket or its lifecycle policy.
pub async fn bucket_delete(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketQuery>,
    Extension(caller): Extension<CallerId>,
) -> ApiResult<Response> {
    if query.lifecycle.is_some() {
        return lifecycle::delete_bucket_lifecycle(&state, caller, &bucket).await;
    }

    let bucket_id = state
        .metadata
        .bucket_id_by_name(&bucket, caller.0)
        .await?
        .ok_or_else(|| ApiError::NoSuchBucket(format!("/{bucket}")))?;

    match state.metadata.delete_bucket_if_empty(bucket_id).await {
        Ok(()) => {
            tracing::info!(bucket, bucket_id, "bucket deleted");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(MetadataError::BucketNotEmpty) => Err(ApiError::BucketNotEmpty(format!("/{bucket}"))),
        Err(e) => Err(e.into()),
    }
}

/// Resolve a bucket owned by the caller or fail with `NoSuchBucket`.
pub(crate) async fn resolve_bucket(
    state: &AppState,
    caller: CallerId,
    bucket: &str,
) -> ApiResult<i64> {
    state
        .metadata
        .bucket_id_by_name(bucket, caller.0)
        .await?
        .ok_or_else(|| ApiError::NoSuchBucket(format!("/{bucket}")))
}
