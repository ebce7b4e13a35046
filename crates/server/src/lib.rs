//! S3-compatible HTTP server for silo.
//!
//! This crate wires the storage engine to the wire:
//! - request routing and the S3 XML dialect,
//! - SigV4 authentication,
//! - the write / read / delete pipelines,
//! - the lifecycle and blob-GC background workers.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod request_id;
pub mod routes;
pub mod s3xml;
pub mod state;
pub mod workers;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
