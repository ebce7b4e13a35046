//! AWS Signature Version 4 verification and the authentication middleware.
//!
//! Verification flow:
//! 1. parse the `Authorization` header (algorithm, credential scope, signed
//!    headers, signature),
//! 2. rebuild the canonical request from the HTTP parts,
//! 3. build the string to sign, derive the signing key with HMAC-SHA256,
//! 4. compare signatures in constant time.
//!
//! Every failure — including a failed secret lookup — is answered with 403
//! `SignatureDoesNotMatch`; the distinction stays in the logs.

use crate::error::ApiError;
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use silo_metadata::MetadataStore;
use silo_metadata::repos::UserRepo;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use time::macros::format_description;

type HmacSha256 = Hmac<Sha256>;

/// The only supported signing algorithm.
const SUPPORTED_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Sentinel payload hash for unsigned bodies.
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// The caller's numeric owner id, attached to every authenticated request.
/// Anonymous callers (when enabled) get id 0.
#[derive(Clone, Copy, Debug)]
pub struct CallerId(pub i64);

/// Resolved credentials for an access key.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub user_id: i64,
    pub secret_key: String,
}

/// Boundary to the credential backend.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Resolve the secret for an access key id, or `None` if unknown.
    async fn lookup_secret(&self, access_key_id: &str) -> Result<Option<Credentials>, AuthError>;
}

/// Credentials provider backed by the metadata store's user table.
pub struct MetadataCredentials {
    metadata: Arc<dyn MetadataStore>,
}

impl MetadataCredentials {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl CredentialsProvider for MetadataCredentials {
    async fn lookup_secret(&self, access_key_id: &str) -> Result<Option<Credentials>, AuthError> {
        let user = self
            .metadata
            .find_user_by_access_key(access_key_id)
            .await
            .map_err(|e| AuthError::Lookup(e.to_string()))?;
        Ok(user.map(|u| Credentials {
            user_id: u.id,
            secret_key: u.secret_access_key,
        }))
    }
}

/// SigV4 verification failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingAuthHeader,

    #[error("unsupported signing algorithm")]
    UnsupportedAlgorithm,

    #[error("malformed Authorization header")]
    MalformedAuthHeader,

    #[error("bad credential scope")]
    BadCredentialScope,

    #[error("missing or invalid x-amz-date")]
    BadDate,

    #[error("request time skew too large")]
    SkewedDate,

    #[error("unsigned payload not allowed")]
    UnsignedPayloadForbidden,

    #[error("unknown access key")]
    UnknownAccessKey,

    #[error("signature does not match")]
    SignatureMismatch,

    #[error("credential lookup failed: {0}")]
    Lookup(String),
}

/// Verification options.
#[derive(Clone, Debug)]
pub struct VerifyOptions {
    /// Maximum allowed clock skew for the request timestamp.
    pub max_skew: Duration,
    /// Accept `x-amz-content-sha256: UNSIGNED-PAYLOAD`.
    pub allow_unsigned_payload: bool,
    /// Required service of the credential scope ("s3").
    pub expected_service: &'static str,
}

/// A successfully verified request.
#[derive(Clone, Debug)]
pub struct VerifiedRequest {
    pub access_key_id: String,
    pub user_id: i64,
}

/// Parsed components of a SigV4 `Authorization` header.
#[derive(Clone, Debug)]
struct ParsedAuth {
    access_key_id: String,
    scope_date: String,
    region: String,
    service: String,
    signed_headers: Vec<String>,
    signature: String,
}

fn parse_authorization_header(header: &str) -> Result<ParsedAuth, AuthError> {
    let (algorithm, rest) = header
        .split_once(' ')
        .ok_or(AuthError::MalformedAuthHeader)?;
    if algorithm != SUPPORTED_ALGORITHM {
        return Err(AuthError::UnsupportedAlgorithm);
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("Credential=") {
            credential = Some(value);
        } else if let Some(value) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(value);
        } else if let Some(value) = part.strip_prefix("Signature=") {
            signature = Some(value);
        }
    }
    let credential = credential.ok_or(AuthError::MalformedAuthHeader)?;
    let signed_headers = signed_headers.ok_or(AuthError::MalformedAuthHeader)?;
    let signature = signature.ok_or(AuthError::MalformedAuthHeader)?;

    // Credential=AKID/YYYYMMDD/region/service/aws4_request
    let scope: Vec<&str> = credential.split('/').collect();
    let [access_key_id, scope_date, region, service, term] = scope.as_slice() else {
        return Err(AuthError::BadCredentialScope);
    };
    if *term != "aws4_request" {
        return Err(AuthError::BadCredentialScope);
    }

    Ok(ParsedAuth {
        access_key_id: access_key_id.to_string(),
        scope_date: scope_date.to_string(),
        region: region.to_string(),
        service: service.to_string(),
        signed_headers: signed_headers
            .split(';')
            .map(|h| h.trim().to_ascii_lowercase())
            .collect(),
        signature: signature.to_ascii_lowercase(),
    })
}

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

/// AWS-style RFC 3986 percent-encoding.
fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        let unreserved = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~');
        if unreserved || (b == b'/' && !encode_slash) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                let hex = bytes.get(i + 1..i + 3);
                match hex.and_then(|h| u8::from_str_radix(std::str::from_utf8(h).ok()?, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Canonical query string: decoded pairs re-encoded and sorted.
fn canonical_query(query: Option<&str>) -> String {
    let Some(query) = query else {
        return String::new();
    };
    let mut pairs: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            format!(
                "{}={}",
                uri_encode(&percent_decode(k), true),
                uri_encode(&percent_decode(v), true)
            )
        })
        .collect();
    pairs.sort();
    pairs.join("&")
}

fn collapse_spaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for c in s.chars() {
        if c.is_ascii_whitespace() {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

fn canonical_request(
    method: &axum::http::Method,
    uri: &axum::http::Uri,
    headers: &axum::http::HeaderMap,
    signed_headers: &[String],
    payload_hash: &str,
) -> String {
    let method = method.as_str();
    let path = uri.path();
    let path = if path.is_empty() { "/" } else { path };
    let query = canonical_query(uri.query());

    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();

    let mut canonical_headers = String::new();
    for name in signed_headers {
        let value = if name == "host" {
            host.clone()
        } else {
            headers
                .get_all(name.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(",")
        };
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(collapse_spaces(&value).trim());
        canonical_headers.push('\n');
    }

    format!(
        "{method}\n{path}\n{query}\n{canonical_headers}\n{signed}\n{payload_hash}",
        signed = signed_headers.join(";")
    )
}

// ---------------------------------------------------------------------------
// Signing primitives
// ---------------------------------------------------------------------------

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, scope_date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), scope_date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Verify the SigV4 signature of a request and resolve the caller.
///
/// Takes the request's parts individually (rather than `&Request`) so the
/// returned future does not hold a reference to the request body, which is
/// not `Sync` and would make this future unusable from `Send` middleware.
pub async fn verify_sigv4(
    method: &axum::http::Method,
    uri: &axum::http::Uri,
    headers: &axum::http::HeaderMap,
    provider: &dyn CredentialsProvider,
    opts: &VerifyOptions,
) -> Result<VerifiedRequest, AuthError> {
    let authz = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;
    let parsed = parse_authorization_header(authz)?;

    if parsed.service != opts.expected_service {
        return Err(AuthError::BadCredentialScope);
    }

    // Request timestamp and skew check.
    let amz_date = headers
        .get("x-amz-date")
        .or_else(|| headers.get("date"))
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::BadDate)?;
    let format = format_description!("[year][month][day]T[hour][minute][second]Z");
    let timestamp = time::PrimitiveDateTime::parse(amz_date, &format)
        .map_err(|_| AuthError::BadDate)?
        .assume_utc();
    if !opts.max_skew.is_zero() {
        let skew = (OffsetDateTime::now_utc() - timestamp).abs();
        if skew > opts.max_skew {
            return Err(AuthError::SkewedDate);
        }
    }

    // Payload hash as declared by the client.
    let empty_hash = sha256_hex(b"");
    let payload_hash = headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&empty_hash);
    if payload_hash.eq_ignore_ascii_case(UNSIGNED_PAYLOAD) && !opts.allow_unsigned_payload {
        return Err(AuthError::UnsignedPayloadForbidden);
    }

    let canonical = canonical_request(method, uri, headers, &parsed.signed_headers, payload_hash);
    let string_to_sign = format!(
        "{SUPPORTED_ALGORITHM}\n{amz_date}\n{scope_date}/{region}/{service}/aws4_request\n{hash}",
        scope_date = parsed.scope_date,
        region = parsed.region,
        service = parsed.service,
        hash = sha256_hex(canonical.as_bytes()),
    );

    let credentials = provider
        .lookup_secret(&parsed.access_key_id)
        .await?
        .ok_or(AuthError::UnknownAccessKey)?;

    let signing_key = derive_signing_key(
        &credentials.secret_key,
        &parsed.scope_date,
        &parsed.region,
        &parsed.service,
    );
    let expected = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    if expected.as_bytes().ct_eq(parsed.signature.as_bytes()).into() {
        Ok(VerifiedRequest {
            access_key_id: parsed.access_key_id,
            user_id: credentials.user_id,
        })
    } else {
        Err(AuthError::SignatureMismatch)
    }
}

/// Paths that skip authentication (probes).
fn is_open_path(path: &str) -> bool {
    matches!(path, "/healthz" | "/readyz")
}

/// Authentication middleware: verifies SigV4 and injects [`CallerId`].
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if is_open_path(req.uri().path()) {
        return next.run(req).await;
    }

    if state.config.auth.allow_anonymous && !req.headers().contains_key(AUTHORIZATION) {
        req.extensions_mut().insert(CallerId(0));
        return next.run(req).await;
    }

    let opts = VerifyOptions {
        max_skew: state.config.auth.max_clock_skew(),
        allow_unsigned_payload: state.config.auth.allow_unsigned_payload,
        expected_service: "s3",
    };
    let provider = MetadataCredentials::new(state.metadata.clone());

    match verify_sigv4(req.method(), req.uri(), req.headers(), &provider, &opts).await {
        Ok(verified) => {
            req.extensions_mut().insert(CallerId(verified.user_id));
            next.run(req).await
        }
        Err(e) => {
            tracing::warn!(path = req.uri().path(), error = %e, "authentication failed");
            ApiError::SignatureMismatch(e.to_string()).into_response()
        }
    }
}
