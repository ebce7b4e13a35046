//! ListObjectsV2.
//!
//! Keys are returned in ascending byte order. The continuation token is
//! base64url of the last returned key and takes precedence over
//! `start-after`. With a delimiter, keys sharing the portion up to and
//! including the first delimiter after the prefix collapse into
//! `CommonPrefixes`.

use crate::auth::CallerId;
use crate::error::{ApiError, ApiResult};
use crate::handlers::buckets::{BucketQuery, resolve_bucket};
use crate::s3xml::{self, ListBucketDoc, ListEntry};
use crate::state::AppState;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use silo_metadata::models::HeadListingRow;
use silo_metadata::repos::{ListHeadPage, ObjectRepo};
use std::collections::BTreeSet;

const DEFAULT_MAX_KEYS: u32 = 1000;

pub(crate) fn encode_token(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key.as_bytes())
}

pub(crate) fn decode_token(token: &str) -> ApiResult<String> {
    URL_SAFE_NO_PAD
        .decode(token.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| {
            ApiError::InvalidArgument("The continuation token provided is invalid.".to_string())
        })
}

/// A grouped listing page, before XML rendering.
struct GroupedListing {
    contents: Vec<HeadListingRow>,
    prefixes: Vec<String>,
    is_truncated: bool,
    /// Seek marker for the next page, when truncated.
    next_key: Option<String>,
}

/// Group one scan page into Contents and CommonPrefixes and apply the
/// visible-item budget. The scan fetched up to `max_keys + 1` rows so a
/// full budget with rows left over reports truncation.
fn group_page(
    rows: Vec<HeadListingRow>,
    prefix: &str,
    delimiter: &str,
    max_keys: usize,
) -> GroupedListing {
    let scanned = rows.len();
    let mut contents = Vec::new();
    let mut prefixes: BTreeSet<String> = BTreeSet::new();

    for row in rows {
        if !delimiter.is_empty() {
            let rest = &row.key[prefix.len()..];
            if let Some(idx) = rest.find(delimiter) {
                prefixes.insert(format!("{prefix}{}", &rest[..idx + delimiter.len()]));
                continue;
            }
        }
        contents.push(row);
    }

    let mut is_truncated = false;
    if scanned > max_keys || contents.len() + prefixes.len() > max_keys {
        is_truncated = true;
        let visible = max_keys.saturating_sub(prefixes.len());
        contents.truncate(visible);
    }

    let next_key = if is_truncated {
        contents
            .last()
            .map(|r| r.key.clone())
            .or_else(|| prefixes.iter().next_back().cloned())
    } else {
        None
    };

    GroupedListing {
        contents,
        prefixes: prefixes.into_iter().collect(),
        is_truncated,
        next_key,
    }
}

/// `GET /{bucket}?list-type=2`.
pub async fn list_objects_v2(
    state: &AppState,
    caller: CallerId,
    bucket: &str,
    query: &BucketQuery,
) -> ApiResult<Response> {
    let prefix = query.prefix.clone().unwrap_or_default();
    let delimiter = query.delimiter.clone().unwrap_or_default();
    if delimiter.chars().count() > 1 {
        return Err(ApiError::InvalidArgument(
            "delimiter must be a single character".to_string(),
        ));
    }

    let max_keys = match &query.max_keys {
        None => DEFAULT_MAX_KEYS,
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| ApiError::InvalidArgument("max-keys must be an integer".to_string()))?
            .clamp(1, 1000) as u32,
    };

    // The continuation token takes precedence over start-after.
    let mut start_after = query.start_after.clone().unwrap_or_default();
    let after_key = match &query.continuation_token {
        Some(token) => {
            start_after = String::new();
            decode_token(token)?
        }
        None => start_after.clone(),
    };

    let bucket_id = resolve_bucket(state, caller, bucket).await?;

    let rows = state
        .metadata
        .list_head_page(&ListHeadPage {
            bucket_id,
            prefix: prefix.clone(),
            after_key: after_key.clone(),
            limit: max_keys + 1,
        })
        .await?;
    let last_scanned = rows.last().map(|r| r.key.clone());

    let mut grouped = group_page(rows, &prefix, &delimiter, max_keys as usize);
    // When every scanned key collapses into the common prefix we are
    // already seeking from, the prefix-derived marker would not advance;
    // seek past the last scanned key instead (it is covered by the
    // visible prefix, so nothing is skipped).
    if grouped.is_truncated && grouped.next_key.as_deref() == Some(after_key.as_str()) {
        grouped.next_key = last_scanned;
    }
    let next_token = grouped.next_key.as_deref().map(encode_token);

    tracing::debug!(
        bucket,
        key_count = grouped.contents.len() + grouped.prefixes.len(),
        is_truncated = grouped.is_truncated,
        "listed objects"
    );

    let doc = ListBucketDoc {
        bucket: bucket.to_string(),
        prefix,
        delimiter,
        max_keys,
        is_truncated: grouped.is_truncated,
        key_count: grouped.contents.len() + grouped.prefixes.len(),
        continuation_token: query.continuation_token.clone(),
        next_continuation_token: next_token,
        start_after: (!start_after.is_empty()).then_some(start_after),
        common_prefixes: grouped.prefixes,
        contents: grouped
            .contents
            .into_iter()
            .map(|r| ListEntry {
                key: r.key,
                etag: r.etag,
                size: r.size.unwrap_or(0),
                last_modified: r.created_at,
            })
            .collect(),
    };

    let body = s3xml::list_bucket_result(&doc)
        .map_err(|e| ApiError::Internal(format!("render listing: {e}")))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        body,
    )
        .into_response())
}
