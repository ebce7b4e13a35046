//! API error types mapping onto the S3 error dialect.

use crate::request_id::current_request_id;
use crate::s3xml;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use silo_metadata::MetadataError;
use silo_storage::StorageError;

/// API error type. Each variant maps one-to-one onto an S3 error code,
/// except the bare-status conditional outcomes (304 / 412 / 416).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("no such version: {0}")]
    NoSuchVersion(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed XML: {0}")]
    MalformedXml(String),

    #[error("bad digest: {0}")]
    BadDigest(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("no lifecycle configuration: {0}")]
    NoSuchLifecycleConfiguration(String),

    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("precondition failed")]
    PreconditionFailed,

    #[error("not modified")]
    NotModified,

    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(MetadataError),
}

impl From<MetadataError> for ApiError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::BucketNotEmpty => Self::BucketNotEmpty(String::new()),
            other => Self::Metadata(other),
        }
    }
}

impl ApiError {
    /// The S3 error code for this error. `None` for bare-status outcomes.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::NoSuchBucket(_) => Some("NoSuchBucket"),
            Self::NoSuchKey(_) => Some("NoSuchKey"),
            Self::NoSuchVersion(_) => Some("NoSuchVersion"),
            Self::BucketNotEmpty(_) => Some("BucketNotEmpty"),
            Self::InvalidBucketName(_) => Some("InvalidBucketName"),
            Self::InvalidArgument(_) => Some("InvalidArgument"),
            Self::MalformedXml(_) => Some("MalformedXML"),
            Self::BadDigest(_) => Some("BadDigest"),
            Self::MethodNotAllowed => Some("MethodNotAllowed"),
            Self::NotImplemented(_) => Some("NotImplemented"),
            Self::NoSuchLifecycleConfiguration(_) => Some("NoSuchLifecycleConfiguration"),
            Self::SignatureMismatch(_) => Some("SignatureDoesNotMatch"),
            Self::PreconditionFailed | Self::NotModified | Self::RangeNotSatisfiable => None,
            Self::Internal(_) | Self::Storage(_) | Self::Metadata(_) => Some("InternalError"),
        }
    }

    /// The HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoSuchBucket(_)
            | Self::NoSuchKey(_)
            | Self::NoSuchVersion(_)
            | Self::NoSuchLifecycleConfiguration(_) => StatusCode::NOT_FOUND,
            Self::BucketNotEmpty(_) => StatusCode::CONFLICT,
            Self::InvalidBucketName(_)
            | Self::InvalidArgument(_)
            | Self::MalformedXml(_)
            | Self::BadDigest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::SignatureMismatch(_) => StatusCode::FORBIDDEN,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::NotModified => StatusCode::NOT_MODIFIED,
            Self::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Internal(_) | Self::Storage(_) | Self::Metadata(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing message. Internal detail stays in the logs.
    fn message(&self) -> String {
        match self {
            Self::NoSuchBucket(_) => "The specified bucket does not exist.".to_string(),
            Self::NoSuchKey(_) => "The specified key does not exist.".to_string(),
            Self::NoSuchVersion(_) => "The specified version does not exist.".to_string(),
            Self::BucketNotEmpty(_) => {
                "The bucket you tried to delete is not empty.".to_string()
            }
            Self::InvalidBucketName(msg) => msg.clone(),
            Self::InvalidArgument(msg) => msg.clone(),
            Self::MalformedXml(_) => "The XML you provided was not well-formed.".to_string(),
            Self::BadDigest(msg) => msg.clone(),
            Self::MethodNotAllowed => {
                "The specified method is not allowed against this resource.".to_string()
            }
            Self::NotImplemented(msg) => msg.clone(),
            Self::NoSuchLifecycleConfiguration(_) => {
                "The lifecycle configuration does not exist.".to_string()
            }
            Self::SignatureMismatch(_) => {
                "The request signature we calculated does not match the signature you provided."
                    .to_string()
            }
            Self::Internal(_) | Self::Storage(_) | Self::Metadata(_) => {
                "We encountered an internal error. Please try again.".to_string()
            }
            Self::PreconditionFailed | Self::NotModified | Self::RangeNotSatisfiable => {
                String::new()
            }
        }
    }

    /// The resource path the error refers to, when the variant carries one.
    fn resource(&self) -> Option<&str> {
        match self {
            Self::NoSuchBucket(r)
            | Self::NoSuchKey(r)
            | Self::NoSuchVersion(r)
            | Self::BucketNotEmpty(r)
            | Self::NoSuchLifecycleConfiguration(r) => (!r.is_empty()).then_some(r.as_str()),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let Some(code) = self.code() else {
            // Conditional outcomes are bare statuses with no body.
            return status.into_response();
        };

        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        } else {
            tracing::debug!(code, error = %self, "request rejected");
        }

        let body = s3xml::error_document(
            code,
            &self.message(),
            self.resource(),
            current_request_id().as_deref(),
        );
        (
            status,
            [(header::CONTENT_TYPE, "application/xml")],
            body,
        )
            .into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
