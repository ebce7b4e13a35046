//! Metadata store for silo.
//!
//! Strongly consistent bookkeeping for buckets, objects, object versions,
//! blobs, idempotency records and lifecycle rules, backed by SQLite via
//! `sqlx`. Multi-row mutations are composite operations that own their
//! transaction and take the per-key critical section on the object row
//! before touching anything else.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};
