//! Bucket lifecycle policy handlers (`?lifecycle` sub-resource).

use crate::auth::CallerId;
use crate::error::{ApiError, ApiResult};
use crate::handlers::buckets::resolve_bucket;
use crate::s3xml;
use crate::state::AppState;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use silo_metadata::repos::LifecycleRepo;

/// `PUT /{bucket}?lifecycle` — replace the bucket's rules wholesale.
pub async fn put_bucket_lifecycle(
    state: &AppState,
    caller: CallerId,
    bucket: &str,
    body: &[u8],
) -> ApiResult<Response> {
    let bucket_id = resolve_bucket(state, caller, bucket).await?;

    let rules = s3xml::parse_lifecycle_configuration(body).map_err(ApiError::MalformedXml)?;
    state
        .metadata
        .replace_lifecycle_rules(bucket_id, &rules)
        .await?;

    tracing::info!(bucket, rules = rules.len(), "lifecycle policy replaced");
    Ok(StatusCode::OK.into_response())
}

/// `GET /{bucket}?lifecycle`.
pub async fn get_bucket_lifecycle(
    state: &AppState,
    caller: CallerId,
    bucket: &str,
) -> ApiResult<Response> {
    let bucket_id = resolve_bucket(state, caller, bucket).await?;

    let rules = state.metadata.list_lifecycle_rules(bucket_id).await?;
    if rules.is_empty() {
        return Err(ApiError::NoSuchLifecycleConfiguration(format!("/{bucket}")));
    }

    let doc = s3xml::lifecycle_configuration(&rules)
        .map_err(|e| ApiError::Internal(format!("render lifecycle: {e}")))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        doc,
    )
        .into_response())
}

/// `DELETE /{bucket}?lifecycle`.
pub async fn delete_bucket_lifecycle(
    state: &AppState,
    caller: CallerId,
    bucket: &str,
) -> ApiResult<Response> {
    let bucket_id = resolve_bucket(state, caller, bucket).await?;
    state.metadata.delete_lifecycle_rules(bucket_id).await?;
    tracing::info!(bucket, "lifecycle policy deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}
