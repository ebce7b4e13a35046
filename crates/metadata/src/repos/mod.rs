//! Repository traits for metadata operations.

pub mod blobs;
pub mod buckets;
pub mod idempotency;
pub mod lifecycle;
pub mod objects;
pub mod users;
pub mod versions;

pub use blobs::{BlobRepo, GcBlob};
pub use buckets::BucketRepo;
pub use idempotency::IdempotencyRepo;
pub use lifecycle::{LifecycleRepo, LifecycleRuleSpec};
pub use objects::{ExpiredHead, ListHeadPage, ObjectRepo, PutCommit, PutOutcome, VersionDelete};
pub use users::UserRepo;
pub use versions::{Prune, VersionRepo};
