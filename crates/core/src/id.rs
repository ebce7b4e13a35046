//! Opaque identifier generation.
//!
//! Blob and version ids are 32 lowercase hex characters drawn from a
//! UUIDv4, giving the 128 bits of randomness the blob store relies on for
//! collision-free temporary paths.

use uuid::Uuid;

fn random_hex() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a fresh blob id.
pub fn new_blob_id() -> String {
    random_hex()
}

/// Generate a fresh version id.
pub fn new_version_id() -> String {
    random_hex()
}

/// Generate a request id for `x-amz-request-id`.
pub fn new_request_id() -> String {
    random_hex()
}
