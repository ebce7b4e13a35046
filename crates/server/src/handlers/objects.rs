//! Object handlers: the write, read and delete pipelines.

use crate::auth::CallerId;
use crate::error::{ApiError, ApiResult};
use crate::handlers::buckets::resolve_bucket;
use crate::state::AppState;
use axum::Extension;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use silo_core::checksum::{ContentHash, etag_matches};
use silo_metadata::MetadataError;
use silo_metadata::repos::{BlobRepo, BucketRepo, ObjectRepo, PutCommit, PutOutcome, VersionRepo};
use silo_storage::WriteHint;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Query parameters recognized on object-level requests.
#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    #[serde(rename = "versionId")]
    pub version_id: Option<String>,
}

/// `PUT /{bucket}/{key}` — the write pipeline.
///
/// Bytes are ingested to the blob store and hashed in one streaming pass
/// before any metadata transaction; the transaction then decides between
/// idempotent replay, dedup adoption and promoting the staged blob. A
/// staged blob that loses either race is deleted here, as is one staged
/// for a transaction that failed.
pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Extension(caller): Extension<CallerId>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    silo_core::validate::bucket_name(&bucket)
        .map_err(|e| ApiError::InvalidBucketName(e.to_string()))?;
    silo_core::validate::object_key(&key)
        .map_err(|e| ApiError::InvalidArgument(e.to_string()))?;

    // A bucket comes into existence on first PUT.
    let bucket_id = state.metadata.ensure_bucket(&bucket, caller.0).await?;

    let content_length: Option<u64> = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    // Ingest outside any transaction: stream to the blob store through the
    // hasher so large bodies never hold database locks.
    let staged_blob_id = silo_core::id::new_blob_id();
    let mut session = state
        .storage
        .begin_write(
            &staged_blob_id,
            WriteHint {
                size: content_length,
            },
        )
        .await?;

    let mut hasher = ContentHash::hasher();
    let mut stream = body.into_data_stream();
    let mut ingest_err: Option<ApiError> = None;
    while let Some(chunk) = stream.next().await {
        let data = match chunk {
            Ok(data) => data,
            Err(e) => {
                ingest_err = Some(ApiError::Internal(format!("body read: {e}")));
                break;
            }
        };
        hasher.update(&data);
        if let Err(e) = session.write(data).await {
            ingest_err = Some(e.into());
            break;
        }
    }
    if let Some(err) = ingest_err {
        let _ = session.abort().await;
        return Err(err);
    }
    let size_observed = session.commit().await?;
    let hash = hasher.finalize();

    // Post-ingest validation; a failed check must leave no state behind.
    if let Some(declared) = content_length
        && declared != size_observed
    {
        delete_staged(&state, &staged_blob_id).await;
        return Err(ApiError::BadDigest(format!(
            "content length mismatch: declared {declared}, received {size_observed}"
        )));
    }
    if let Some(declared) = headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        && !declared.eq_ignore_ascii_case("UNSIGNED-PAYLOAD")
        && !declared.eq_ignore_ascii_case(&hash.to_hex())
    {
        delete_staged(&state, &staged_blob_id).await;
        return Err(ApiError::BadDigest("sha256 mismatch".to_string()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    let idempotency_key = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let put = PutCommit {
        bucket_id,
        key: key.clone(),
        staged_blob_id: staged_blob_id.clone(),
        checksum: hash.checksum(),
        size: size_observed as i64,
        etag: hash.etag(),
        content_type,
        idempotency_key,
    };
    let outcome = match state.metadata.commit_put(put).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // On transaction failure the staged blob is always ours to
            // reclaim; a dedup adoption only exists in the rolled-back txn.
            delete_staged(&state, &staged_blob_id).await;
            return Err(e.into());
        }
    };

    let (version_id, etag) = match outcome {
        PutOutcome::Committed {
            version_id,
            blob_id,
            etag,
            deduped,
        } => {
            if deduped {
                delete_staged(&state, &staged_blob_id).await;
            }
            tracing::info!(bucket, key, version_id, blob_id, deduped, "object written");
            (version_id, etag)
        }
        PutOutcome::Replayed { version_id, etag } => {
            delete_staged(&state, &staged_blob_id).await;
            tracing::info!(bucket, key, version_id, "idempotent replay");
            (version_id, etag)
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, etag.as_str())
        .header(header::CONTENT_TYPE, "application/xml")
        .header("x-amz-version-id", version_id.as_str())
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(format!("build response: {e}")))
}

async fn delete_staged(state: &AppState, blob_id: &str) {
    if let Err(e) = state.storage.delete(blob_id).await {
        tracing::warn!(blob_id, error = %e, "failed to delete staged blob");
    }
}

/// `GET /{bucket}/{key}` — the read pipeline.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    Extension(caller): Extension<CallerId>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    read_object(&state, caller, &bucket, &key, query.version_id, &headers, true).await
}

/// `HEAD /{bucket}/{key}` — identical to GET minus the body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    Extension(caller): Extension<CallerId>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    read_object(&state, caller, &bucket, &key, query.version_id, &headers, false).await
}

async fn read_object(
    state: &AppState,
    caller: CallerId,
    bucket: &str,
    key: &str,
    version_id: Option<String>,
    headers: &HeaderMap,
    want_body: bool,
) -> ApiResult<Response> {
    let resource = format!("/{bucket}/{key}");
    let bucket_id = resolve_bucket(state, caller, bucket).await?;

    let version = match &version_id {
        Some(vid) => state.metadata.get_version(vid).await?,
        None => state.metadata.get_head_version(bucket_id, key).await?,
    };
    // A missing version, a delete-marker, or a version of some other key
    // all resolve to NoSuchKey.
    let version = version
        .filter(|v| v.bucket_id == bucket_id && v.key == key)
        .filter(|v| !v.is_delete)
        .ok_or_else(|| ApiError::NoSuchKey(resource.clone()))?;

    let blob_id = version
        .blob_id
        .as_deref()
        .ok_or_else(|| ApiError::Internal(format!("version {} has no blob", version.version_id)))?;
    let blob = state
        .metadata
        .get_blob(blob_id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("blob record missing: {blob_id}")))?;

    // Conditional predicates come before any byte work.
    if let Some(etag) = &version.etag {
        if let Some(if_match) = headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok())
            && !etag_matches(if_match, etag)
        {
            return Err(ApiError::PreconditionFailed);
        }
        if let Some(if_none) = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            && etag_matches(if_none, etag)
        {
            return Err(ApiError::NotModified);
        }
    }

    let total = blob.size as u64;
    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(raw) => parse_range(raw, total)?,
        None => None,
    };

    let (status, start, length) = match range {
        Some((start, length)) => (StatusCode::PARTIAL_CONTENT, start, length),
        None => (StatusCode::OK, 0, total),
    };

    let content_type = version
        .content_type
        .clone()
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, length)
        .header("x-amz-version-id", version.version_id.as_str());
    if let Some(etag) = &version.etag {
        builder = builder.header(header::ETAG, etag.as_str());
    }
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{}/{total}", start + length.saturating_sub(1)),
        );
    }

    let body = if want_body && length > 0 {
        let stream = state.storage.read_at(blob_id, start, Some(length)).await?;
        Body::from_stream(stream)
    } else {
        Body::empty()
    };

    tracing::debug!(
        bucket,
        key,
        version_id = %version.version_id,
        status = status.as_u16(),
        "object read"
    );
    builder
        .body(body)
        .map_err(|e| ApiError::Internal(format!("build response: {e}")))
}

/// Parse a `Range` header against the object size.
///
/// Returns `(start, length)`, `None` for a non-bytes range unit, or 416
/// for empty, malformed or out-of-range specs.
fn parse_range(raw: &str, total: u64) -> ApiResult<Option<(u64, u64)>> {
    let Some(spec) = raw.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    // No byte of an empty object is addressable.
    if total == 0 {
        return Err(ApiError::RangeNotSatisfiable);
    }
    let Some((first, last)) = spec.split_once('-') else {
        return Err(ApiError::RangeNotSatisfiable);
    };

    match (first.is_empty(), last.is_empty()) {
        // bytes=a-b
        (false, false) => {
            let start: u64 = first.parse().map_err(|_| ApiError::RangeNotSatisfiable)?;
            let end: u64 = last.parse().map_err(|_| ApiError::RangeNotSatisfiable)?;
            if start > end || start >= total {
                return Err(ApiError::RangeNotSatisfiable);
            }
            let end = end.min(total - 1);
            Ok(Some((start, end - start + 1)))
        }
        // bytes=a-
        (false, true) => {
            let start: u64 = first.parse().map_err(|_| ApiError::RangeNotSatisfiable)?;
            if start >= total {
                return Err(ApiError::RangeNotSatisfiable);
            }
            Ok(Some((start, total - start)))
        }
        // bytes=-n (suffix)
        (true, false) => {
            let n: u64 = last.parse().map_err(|_| ApiError::RangeNotSatisfiable)?;
            if n == 0 {
                return Err(ApiError::RangeNotSatisfiable);
            }
            let n = n.min(total);
            Ok(Some((total - n, n)))
        }
        (true, true) => Err(ApiError::RangeNotSatisfiable),
    }
}

/// `DELETE /{bucket}/{key}` — the delete path.
///
/// Without `versionId` this is a soft delete: a delete-marker becomes the
/// head. With `versionId` the version is removed permanently, the head is
/// rewired, and the blob's bytes are reclaimed once its record has gone.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    Extension(caller): Extension<CallerId>,
) -> ApiResult<Response> {
    let resource = format!("/{bucket}/{key}");
    let bucket_id = resolve_bucket(&state, caller, &bucket).await?;

    let returned_version = match query.version_id {
        None => {
            let marker_id = state.metadata.soft_delete_object(bucket_id, &key).await?;
            tracing::info!(bucket, key, marker_id, "soft delete");
            marker_id
        }
        Some(version_id) => {
            let outcome = state
                .metadata
                .delete_version_permanent(bucket_id, &key, &version_id)
                .await;
            match outcome {
                Ok(result) => {
                    // The record is gone; bytes go after the commit. The
                    // delete is idempotent, so a failure here is retried by
                    // the next GC pass.
                    if let Some(blob_id) = result.removed_blob_id {
                        if let Err(e) = state.storage.delete(&blob_id).await {
                            tracing::warn!(blob_id, error = %e, "blob byte delete failed");
                        } else {
                            tracing::info!(bucket, key, blob_id, "blob reclaimed");
                        }
                    }
                    tracing::info!(bucket, key, version_id, "version deleted");
                    version_id
                }
                Err(MetadataError::NotFound(_)) => {
                    return Err(ApiError::NoSuchVersion(resource));
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    Ok((
        StatusCode::NO_CONTENT,
        [("x-amz-version-id", returned_version)],
    )
        .into_response())
}
