//! Content hashing and the checksum / ETag formats.
//!
//! Blobs are addressed by the SHA-256 of their bytes. The metadata layer
//! stores the digest as a checksum string `sha256:<64 hex>` (the dedup key
//! over ready blobs), and the HTTP layer quotes it as the ETag
//! `"sha256:<64 hex>"`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix carried by every checksum string.
pub const CHECKSUM_PREFIX: &str = "sha256:";

/// A SHA-256 content hash represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute the SHA-256 hash of a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher for streaming input.
    pub fn hasher() -> ContentHasher {
        ContentHasher(Sha256::new())
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidHash(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// The checksum string used as the dedup key: `sha256:<hex>`.
    pub fn checksum(&self) -> String {
        format!("{CHECKSUM_PREFIX}{}", self.to_hex())
    }

    /// The quoted ETag form: `"sha256:<hex>"`.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.checksum())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental SHA-256 hasher.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    /// Feed more data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> ContentHash {
        ContentHash(self.0.finalize().into())
    }
}

/// Strip surrounding double quotes from an ETag value, if present.
pub fn strip_etag_quotes(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// Compare two ETag values ignoring surrounding quotes.
pub fn etag_matches(a: &str, b: &str) -> bool {
    strip_etag_quotes(a) == strip_etag_quotes(b)
}
