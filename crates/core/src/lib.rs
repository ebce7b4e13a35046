//! Core domain types for silo.
//!
//! This crate holds the pieces every other crate agrees on:
//! - content hashing and the checksum / ETag wire formats,
//! - opaque identifier generation for blobs and versions,
//! - configuration types,
//! - the core error type and request validation helpers.

pub mod checksum;
pub mod config;
pub mod error;
pub mod id;
pub mod validate;

pub use checksum::{ContentHash, ContentHasher};
pub use error::{Error, Result};
