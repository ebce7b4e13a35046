//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{
    BlobRepo, BucketRepo, ExpiredHead, GcBlob, IdempotencyRepo, LifecycleRepo, LifecycleRuleSpec,
    ListHeadPage, ObjectRepo, Prune, PutCommit, PutOutcome, UserRepo, VersionDelete, VersionRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    BucketRepo
    + ObjectRepo
    + VersionRepo
    + BlobRepo
    + IdempotencyRepo
    + LifecycleRepo
    + UserRepo
    + Send
    + Sync
{
    /// Create the schema if it does not exist yet.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> MetadataResult<()>;
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    access_key_id TEXT NOT NULL UNIQUE,
    secret_access_key TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS buckets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    owner_id INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_buckets_owner ON buckets (owner_id, name);

CREATE TABLE IF NOT EXISTS blobs (
    id TEXT PRIMARY KEY,
    checksum TEXT NOT NULL,
    size INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    storage_node TEXT NOT NULL DEFAULT 'local',
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS ux_blobs_ready_checksum
    ON blobs (checksum) WHERE state = 'ready';
CREATE INDEX IF NOT EXISTS ix_blobs_state_created ON blobs (state, created_at);

CREATE TABLE IF NOT EXISTS objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bucket_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    head_version_id TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    UNIQUE (bucket_id, key)
);

CREATE TABLE IF NOT EXISTS object_versions (
    version_id TEXT PRIMARY KEY,
    bucket_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    blob_id TEXT,
    size INTEGER,
    etag TEXT,
    content_type TEXT,
    is_delete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_versions_bucket_key_created
    ON object_versions (bucket_id, key, created_at DESC);
CREATE INDEX IF NOT EXISTS ix_versions_blob ON object_versions (blob_id);

CREATE TABLE IF NOT EXISTS idempotency_keys (
    bucket_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    idem_key TEXT NOT NULL,
    version_id TEXT NOT NULL,
    etag TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (bucket_id, key, idem_key)
);

CREATE TABLE IF NOT EXISTS lifecycle_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bucket_id INTEGER NOT NULL,
    prefix TEXT NOT NULL DEFAULT '',
    enabled INTEGER NOT NULL DEFAULT 1,
    expire_current_after_days INTEGER,
    expire_noncurrent_after_days INTEGER,
    noncurrent_newer_versions_to_keep INTEGER,
    purge_delete_markers_after_days INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_lifecycle_bucket ON lifecycle_rules (bucket_id, enabled);
"#;

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MetadataError::Internal(format!("create db dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(MetadataError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under load.
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes all write transactions, which is
        // the per-key critical section strategy for an embedded engine.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "metadata store opened");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Escape `prefix` for a LIKE match and append the wildcard.
fn like_pattern(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Per-key critical section: a no-op UPDATE on the object row forces row
/// locking on engines that have it, creating the row first if the key has
/// never been written.
async fn lock_object_for_update(
    conn: &mut SqliteConnection,
    bucket_id: i64,
    key: &str,
) -> MetadataResult<()> {
    let res = sqlx::query("UPDATE objects SET key = key WHERE bucket_id = ? AND key = ?")
        .bind(bucket_id)
        .bind(key)
        .execute(&mut *conn)
        .await?;
    if res.rows_affected() > 0 {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO objects (bucket_id, key, head_version_id, created_at) VALUES (?, ?, '', ?) \
         ON CONFLICT (bucket_id, key) DO NOTHING",
    )
    .bind(bucket_id)
    .bind(key)
    .bind(OffsetDateTime::now_utc())
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE objects SET key = key WHERE bucket_id = ? AND key = ?")
        .bind(bucket_id)
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn set_head_version(
    conn: &mut SqliteConnection,
    bucket_id: i64,
    key: &str,
    version_id: &str,
) -> MetadataResult<()> {
    sqlx::query("UPDATE objects SET head_version_id = ? WHERE bucket_id = ? AND key = ?")
        .bind(version_id)
        .bind(bucket_id)
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

async fn insert_delete_marker(
    conn: &mut SqliteConnection,
    bucket_id: i64,
    key: &str,
    version_id: &str,
    now: OffsetDateTime,
) -> MetadataResult<()> {
    sqlx::query(
        "INSERT INTO object_versions \
         (version_id, bucket_id, key, blob_id, size, etag, content_type, is_delete, created_at) \
         VALUES (?, ?, ?, NULL, NULL, NULL, NULL, 1, ?)",
    )
    .bind(version_id)
    .bind(bucket_id)
    .bind(key)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

async fn fetch_version(
    conn: &mut SqliteConnection,
    bucket_id: i64,
    key: &str,
    version_id: &str,
) -> MetadataResult<Option<ObjectVersionRow>> {
    let row = sqlx::query_as::<_, ObjectVersionRow>(
        "SELECT * FROM object_versions WHERE version_id = ? AND bucket_id = ? AND key = ?",
    )
    .bind(version_id)
    .bind(bucket_id)
    .bind(key)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

async fn head_version_id(
    conn: &mut SqliteConnection,
    bucket_id: i64,
    key: &str,
) -> MetadataResult<Option<String>> {
    let head: Option<String> =
        sqlx::query_scalar("SELECT head_version_id FROM objects WHERE bucket_id = ? AND key = ?")
            .bind(bucket_id)
            .bind(key)
            .fetch_optional(conn)
            .await?;
    Ok(head.filter(|h| !h.is_empty()))
}

/// Drop the blob record if the given blob has lost its last non-delete
/// reference. Returns the id whose bytes should now be deleted.
async fn release_blob_if_unreferenced(
    conn: &mut SqliteConnection,
    blob_id: Option<&str>,
) -> MetadataResult<Option<String>> {
    let Some(blob_id) = blob_id else {
        return Ok(None);
    };
    let refs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM object_versions WHERE blob_id = ? AND is_delete = 0",
    )
    .bind(blob_id)
    .fetch_one(&mut *conn)
    .await?;
    if refs > 0 {
        return Ok(None);
    }
    sqlx::query("DELETE FROM blobs WHERE id = ?")
        .bind(blob_id)
        .execute(conn)
        .await?;
    Ok(Some(blob_id.to_string()))
}

// Repository implementations for SqliteStore.
mod sqlite_impl {
    use super::*;

    #[async_trait]
    impl BucketRepo for SqliteStore {
        async fn ensure_bucket(&self, name: &str, owner_id: i64) -> MetadataResult<i64> {
            if let Some((id, owner)) =
                sqlx::query_as::<_, (i64, i64)>("SELECT id, owner_id FROM buckets WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?
            {
                // Claim ownership of a bucket created before its owner was
                // known (anonymous bootstrap).
                if owner == 0 && owner_id != 0 {
                    sqlx::query("UPDATE buckets SET owner_id = ? WHERE id = ?")
                        .bind(owner_id)
                        .bind(id)
                        .execute(&self.pool)
                        .await?;
                }
                return Ok(id);
            }

            sqlx::query(
                "INSERT INTO buckets (name, owner_id, created_at) VALUES (?, ?, ?) \
                 ON CONFLICT (name) DO NOTHING",
            )
            .bind(name)
            .bind(owner_id)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;

            let id: i64 = sqlx::query_scalar("SELECT id FROM buckets WHERE name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
            Ok(id)
        }

        async fn bucket_id_by_name(
            &self,
            name: &str,
            owner_id: i64,
        ) -> MetadataResult<Option<i64>> {
            let id: Option<i64> =
                sqlx::query_scalar("SELECT id FROM buckets WHERE name = ? AND owner_id = ?")
                    .bind(name)
                    .bind(owner_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(id)
        }

        async fn list_buckets(&self, owner_id: i64) -> MetadataResult<Vec<BucketRow>> {
            let rows = sqlx::query_as::<_, BucketRow>(
                "SELECT * FROM buckets WHERE owner_id = ? ORDER BY name ASC",
            )
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_bucket_if_empty(&self, bucket_id: i64) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            let objects: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM objects WHERE bucket_id = ?")
                    .bind(bucket_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if objects > 0 {
                return Err(MetadataError::BucketNotEmpty);
            }
            let versions: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM object_versions WHERE bucket_id = ?")
                    .bind(bucket_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if versions > 0 {
                return Err(MetadataError::BucketNotEmpty);
            }

            sqlx::query("DELETE FROM lifecycle_rules WHERE bucket_id = ?")
                .bind(bucket_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM idempotency_keys WHERE bucket_id = ?")
                .bind(bucket_id)
                .execute(&mut *tx)
                .await?;
            let res = sqlx::query("DELETE FROM buckets WHERE id = ?")
                .bind(bucket_id)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("bucket {bucket_id}")));
            }

            tx.commit().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ObjectRepo for SqliteStore {
        async fn get_head_version(
            &self,
            bucket_id: i64,
            key: &str,
        ) -> MetadataResult<Option<ObjectVersionRow>> {
            let row = sqlx::query_as::<_, ObjectVersionRow>(
                "SELECT v.* FROM objects o \
                 JOIN object_versions v ON v.version_id = o.head_version_id \
                 WHERE o.bucket_id = ? AND o.key = ?",
            )
            .bind(bucket_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn commit_put(&self, put: PutCommit) -> MetadataResult<PutOutcome> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;
            lock_object_for_update(&mut tx, put.bucket_id, &put.key).await?;

            // Idempotency probe, after the lock: a concurrent writer with
            // the same token either committed before us or waits on us.
            if let Some(token) = &put.idempotency_key {
                let replay = sqlx::query_as::<_, IdempotencyRow>(
                    "SELECT * FROM idempotency_keys \
                     WHERE bucket_id = ? AND key = ? AND idem_key = ?",
                )
                .bind(put.bucket_id)
                .bind(&put.key)
                .bind(token)
                .fetch_optional(&mut *tx)
                .await?;
                if let Some(row) = replay {
                    tx.commit().await?;
                    return Ok(PutOutcome::Replayed {
                        version_id: row.version_id,
                        etag: row.etag,
                    });
                }
            }

            // Dedup probe: adopt the ready blob with this checksum if one
            // exists, otherwise promote the staged blob.
            let existing = sqlx::query_as::<_, BlobRow>(
                "SELECT * FROM blobs WHERE checksum = ? AND state = ? LIMIT 1",
            )
            .bind(&put.checksum)
            .bind(BLOB_STATE_READY)
            .fetch_optional(&mut *tx)
            .await?;

            let (blob_id, blob_size, deduped) = match existing {
                Some(blob) => (blob.id, blob.size, true),
                None => {
                    sqlx::query(
                        "INSERT INTO blobs (id, checksum, size, state, storage_node, created_at) \
                         VALUES (?, ?, ?, ?, 'local', ?)",
                    )
                    .bind(&put.staged_blob_id)
                    .bind(&put.checksum)
                    .bind(put.size)
                    .bind(BLOB_STATE_PENDING)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    sqlx::query("UPDATE blobs SET state = ? WHERE id = ?")
                        .bind(BLOB_STATE_READY)
                        .bind(&put.staged_blob_id)
                        .execute(&mut *tx)
                        .await?;
                    (put.staged_blob_id.clone(), put.size, false)
                }
            };

            let version_id = silo_core::id::new_version_id();
            sqlx::query(
                "INSERT INTO object_versions \
                 (version_id, bucket_id, key, blob_id, size, etag, content_type, is_delete, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(&version_id)
            .bind(put.bucket_id)
            .bind(&put.key)
            .bind(&blob_id)
            .bind(blob_size)
            .bind(&put.etag)
            .bind(&put.content_type)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            set_head_version(&mut tx, put.bucket_id, &put.key, &version_id).await?;

            if let Some(token) = &put.idempotency_key {
                sqlx::query(
                    "INSERT INTO idempotency_keys \
                     (bucket_id, key, idem_key, version_id, etag, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?) \
                     ON CONFLICT (bucket_id, key, idem_key) DO NOTHING",
                )
                .bind(put.bucket_id)
                .bind(&put.key)
                .bind(token)
                .bind(&version_id)
                .bind(&put.etag)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(PutOutcome::Committed {
                version_id,
                blob_id,
                etag: put.etag,
                deduped,
            })
        }

        async fn soft_delete_object(&self, bucket_id: i64, key: &str) -> MetadataResult<String> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;
            lock_object_for_update(&mut tx, bucket_id, key).await?;

            let marker_id = silo_core::id::new_version_id();
            insert_delete_marker(&mut tx, bucket_id, key, &marker_id, now).await?;
            set_head_version(&mut tx, bucket_id, key, &marker_id).await?;

            tx.commit().await?;
            Ok(marker_id)
        }

        async fn delete_version_permanent(
            &self,
            bucket_id: i64,
            key: &str,
            version_id: &str,
        ) -> MetadataResult<VersionDelete> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;
            lock_object_for_update(&mut tx, bucket_id, key).await?;

            let Some(ver) = fetch_version(&mut tx, bucket_id, key, version_id).await? else {
                return Err(MetadataError::NotFound(format!("version {version_id}")));
            };

            sqlx::query("DELETE FROM object_versions WHERE version_id = ?")
                .bind(version_id)
                .execute(&mut *tx)
                .await?;

            // If the head was removed, rewire it to the newest remaining
            // version; if nothing remains, shadow the key with a marker.
            let head = head_version_id(&mut tx, bucket_id, key).await?;
            if head.as_deref() == Some(version_id) || head.is_none() {
                let newest = sqlx::query_as::<_, ObjectVersionRow>(
                    "SELECT * FROM object_versions WHERE bucket_id = ? AND key = ? \
                     ORDER BY created_at DESC, version_id DESC LIMIT 1",
                )
                .bind(bucket_id)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
                match newest {
                    Some(prev) => {
                        set_head_version(&mut tx, bucket_id, key, &prev.version_id).await?;
                    }
                    None => {
                        let marker_id = silo_core::id::new_version_id();
                        insert_delete_marker(&mut tx, bucket_id, key, &marker_id, now).await?;
                        set_head_version(&mut tx, bucket_id, key, &marker_id).await?;
                    }
                }
            }

            let removed_blob_id =
                release_blob_if_unreferenced(&mut tx, ver.blob_id.as_deref()).await?;

            tx.commit().await?;
            Ok(VersionDelete { removed_blob_id })
        }

        async fn expire_current_object(
            &self,
            bucket_id: i64,
            key: &str,
        ) -> MetadataResult<Option<String>> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;
            lock_object_for_update(&mut tx, bucket_id, key).await?;

            let head = sqlx::query_as::<_, ObjectVersionRow>(
                "SELECT v.* FROM objects o \
                 JOIN object_versions v ON v.version_id = o.head_version_id \
                 WHERE o.bucket_id = ? AND o.key = ?",
            )
            .bind(bucket_id)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

            // Already shadowed (or raced away): nothing to expire.
            let Some(head) = head else {
                tx.commit().await?;
                return Ok(None);
            };
            if head.is_delete {
                tx.commit().await?;
                return Ok(None);
            }

            let marker_id = silo_core::id::new_version_id();
            insert_delete_marker(&mut tx, bucket_id, key, &marker_id, now).await?;
            set_head_version(&mut tx, bucket_id, key, &marker_id).await?;

            tx.commit().await?;
            Ok(Some(marker_id))
        }

        async fn list_head_page(
            &self,
            page: &ListHeadPage,
        ) -> MetadataResult<Vec<HeadListingRow>> {
            let rows = sqlx::query_as::<_, HeadListingRow>(
                "SELECT o.key AS key, v.etag AS etag, v.size AS size, v.created_at AS created_at \
                 FROM objects o \
                 JOIN object_versions v ON v.version_id = o.head_version_id \
                 WHERE o.bucket_id = ? AND v.is_delete = 0 \
                   AND o.key LIKE ? ESCAPE '\\' AND o.key > ? \
                 ORDER BY o.key ASC LIMIT ?",
            )
            .bind(page.bucket_id)
            .bind(like_pattern(&page.prefix))
            .bind(&page.after_key)
            .bind(page.limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_heads_older_than(
            &self,
            bucket_id: i64,
            prefix: &str,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<ExpiredHead>> {
            let rows = sqlx::query_as::<_, (i64, String)>(
                "SELECT o.bucket_id, o.key FROM objects o \
                 JOIN object_versions v ON v.version_id = o.head_version_id \
                 WHERE o.bucket_id = ? AND o.key LIKE ? ESCAPE '\\' \
                   AND v.is_delete = 0 AND v.created_at < ? \
                 ORDER BY v.created_at ASC LIMIT ?",
            )
            .bind(bucket_id)
            .bind(like_pattern(prefix))
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|(bucket_id, key)| ExpiredHead { bucket_id, key })
                .collect())
        }
    }

    #[async_trait]
    impl VersionRepo for SqliteStore {
        async fn get_version(
            &self,
            version_id: &str,
        ) -> MetadataResult<Option<ObjectVersionRow>> {
            let row = sqlx::query_as::<_, ObjectVersionRow>(
                "SELECT * FROM object_versions WHERE version_id = ?",
            )
            .bind(version_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_versions(
            &self,
            bucket_id: i64,
            key: &str,
        ) -> MetadataResult<Vec<ObjectVersionRow>> {
            let rows = sqlx::query_as::<_, ObjectVersionRow>(
                "SELECT * FROM object_versions WHERE bucket_id = ? AND key = ? \
                 ORDER BY created_at DESC, version_id DESC",
            )
            .bind(bucket_id)
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_noncurrent_by_age(
            &self,
            bucket_id: i64,
            prefix: &str,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<ObjectVersionRow>> {
            let rows = sqlx::query_as::<_, ObjectVersionRow>(
                "SELECT v.* FROM object_versions v \
                 JOIN objects o ON o.bucket_id = v.bucket_id AND o.key = v.key \
                 WHERE v.bucket_id = ? AND v.key LIKE ? ESCAPE '\\' \
                   AND v.is_delete = 0 AND v.created_at < ? \
                   AND v.version_id <> o.head_version_id \
                 ORDER BY v.created_at ASC LIMIT ?",
            )
            .bind(bucket_id)
            .bind(like_pattern(prefix))
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn list_noncurrent_beyond_newest(
            &self,
            bucket_id: i64,
            prefix: &str,
            keep: u32,
            limit: u32,
        ) -> MetadataResult<Vec<ObjectVersionRow>> {
            // Keys whose noncurrent, non-delete version count exceeds `keep`.
            let keys = sqlx::query_as::<_, (String, i64)>(
                "SELECT v.key, COUNT(*) AS cnt FROM object_versions v \
                 JOIN objects o ON o.bucket_id = v.bucket_id AND o.key = v.key \
                 WHERE v.bucket_id = ? AND v.key LIKE ? ESCAPE '\\' AND v.is_delete = 0 \
                   AND v.version_id <> o.head_version_id \
                 GROUP BY v.key HAVING COUNT(*) > ? ORDER BY v.key",
            )
            .bind(bucket_id)
            .bind(like_pattern(prefix))
            .bind(keep)
            .fetch_all(&self.pool)
            .await?;

            let mut out = Vec::new();
            let mut left = limit as i64;
            for (key, _) in keys {
                if left <= 0 {
                    break;
                }
                // Everything after the newest `keep` noncurrent versions.
                let rows = sqlx::query_as::<_, ObjectVersionRow>(
                    "SELECT v.* FROM object_versions v \
                     JOIN objects o ON o.bucket_id = v.bucket_id AND o.key = v.key \
                     WHERE v.bucket_id = ? AND v.key = ? AND v.is_delete = 0 \
                       AND v.version_id <> o.head_version_id \
                     ORDER BY v.created_at DESC, v.version_id DESC \
                     LIMIT ? OFFSET ?",
                )
                .bind(bucket_id)
                .bind(&key)
                .bind(left)
                .bind(keep)
                .fetch_all(&self.pool)
                .await?;
                left -= rows.len() as i64;
                out.extend(rows);
            }
            Ok(out)
        }

        async fn list_delete_markers_older_than(
            &self,
            bucket_id: i64,
            prefix: &str,
            older_than: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<ObjectVersionRow>> {
            let rows = sqlx::query_as::<_, ObjectVersionRow>(
                "SELECT * FROM object_versions \
                 WHERE bucket_id = ? AND key LIKE ? ESCAPE '\\' \
                   AND is_delete = 1 AND created_at < ? \
                 ORDER BY created_at ASC LIMIT ?",
            )
            .bind(bucket_id)
            .bind(like_pattern(prefix))
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn prune_version(
            &self,
            bucket_id: i64,
            key: &str,
            version_id: &str,
        ) -> MetadataResult<Prune> {
            let mut tx = self.pool.begin().await?;
            lock_object_for_update(&mut tx, bucket_id, key).await?;

            let Some(ver) = fetch_version(&mut tx, bucket_id, key, version_id).await? else {
                tx.commit().await?;
                return Ok(Prune::Skipped);
            };
            // The version may have become the head since it was listed
            // (head rewiring by a concurrent versioned delete).
            if head_version_id(&mut tx, bucket_id, key).await?.as_deref() == Some(version_id) {
                tx.commit().await?;
                return Ok(Prune::Skipped);
            }

            sqlx::query("DELETE FROM object_versions WHERE version_id = ?")
                .bind(version_id)
                .execute(&mut *tx)
                .await?;
            let removed_blob_id =
                release_blob_if_unreferenced(&mut tx, ver.blob_id.as_deref()).await?;

            tx.commit().await?;
            Ok(Prune::Pruned { removed_blob_id })
        }

        async fn purge_delete_marker(
            &self,
            bucket_id: i64,
            key: &str,
            version_id: &str,
        ) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;
            lock_object_for_update(&mut tx, bucket_id, key).await?;

            let Some(ver) = fetch_version(&mut tx, bucket_id, key, version_id).await? else {
                tx.commit().await?;
                return Ok(false);
            };
            if !ver.is_delete {
                tx.commit().await?;
                return Ok(false);
            }
            // Purging the head would resurrect the key.
            if head_version_id(&mut tx, bucket_id, key).await?.as_deref() == Some(version_id) {
                tx.commit().await?;
                return Ok(false);
            }

            sqlx::query("DELETE FROM object_versions WHERE version_id = ?")
                .bind(version_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(true)
        }
    }

    #[async_trait]
    impl BlobRepo for SqliteStore {
        async fn get_blob(&self, id: &str) -> MetadataResult<Option<BlobRow>> {
            let row = sqlx::query_as::<_, BlobRow>("SELECT * FROM blobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn blob_exists(&self, id: &str) -> MetadataResult<bool> {
            let row: Option<i32> = sqlx::query_scalar("SELECT 1 FROM blobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.is_some())
        }

        async fn count_blob_references(&self, blob_id: &str) -> MetadataResult<i64> {
            let n: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM object_versions WHERE blob_id = ? AND is_delete = 0",
            )
            .bind(blob_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(n)
        }

        async fn list_unreferenced_blobs(&self, limit: u32) -> MetadataResult<Vec<GcBlob>> {
            let rows = sqlx::query_as::<_, (String, i64)>(
                "SELECT b.id, b.size FROM blobs b \
                 LEFT JOIN object_versions v ON v.blob_id = b.id AND v.is_delete = 0 \
                 WHERE v.blob_id IS NULL AND b.state = ? \
                 ORDER BY b.created_at ASC LIMIT ?",
            )
            .bind(BLOB_STATE_READY)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows
                .into_iter()
                .map(|(id, size)| GcBlob { id, size })
                .collect())
        }

        async fn delete_blob_record(&self, id: &str) -> MetadataResult<()> {
            sqlx::query("DELETE FROM blobs WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl IdempotencyRepo for SqliteStore {
        async fn get_idempotency(
            &self,
            bucket_id: i64,
            key: &str,
            idem_key: &str,
        ) -> MetadataResult<Option<IdempotencyRow>> {
            let row = sqlx::query_as::<_, IdempotencyRow>(
                "SELECT * FROM idempotency_keys \
                 WHERE bucket_id = ? AND key = ? AND idem_key = ?",
            )
            .bind(bucket_id)
            .bind(key)
            .bind(idem_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl LifecycleRepo for SqliteStore {
        async fn replace_lifecycle_rules(
            &self,
            bucket_id: i64,
            rules: &[LifecycleRuleSpec],
        ) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM lifecycle_rules WHERE bucket_id = ?")
                .bind(bucket_id)
                .execute(&mut *tx)
                .await?;
            for rule in rules {
                sqlx::query(
                    "INSERT INTO lifecycle_rules \
                     (bucket_id, prefix, enabled, expire_current_after_days, \
                      expire_noncurrent_after_days, noncurrent_newer_versions_to_keep, \
                      purge_delete_markers_after_days, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(bucket_id)
                .bind(&rule.prefix)
                .bind(rule.enabled)
                .bind(rule.expire_current_after_days)
                .bind(rule.expire_noncurrent_after_days)
                .bind(rule.noncurrent_newer_versions_to_keep)
                .bind(rule.purge_delete_markers_after_days)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn list_lifecycle_rules(
            &self,
            bucket_id: i64,
        ) -> MetadataResult<Vec<LifecycleRuleRow>> {
            let rows = sqlx::query_as::<_, LifecycleRuleRow>(
                "SELECT * FROM lifecycle_rules WHERE bucket_id = ? ORDER BY id",
            )
            .bind(bucket_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_lifecycle_rules(&self, bucket_id: i64) -> MetadataResult<()> {
            sqlx::query("DELETE FROM lifecycle_rules WHERE bucket_id = ?")
                .bind(bucket_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn list_enabled_lifecycle_rules(&self) -> MetadataResult<Vec<LifecycleRuleRow>> {
            let rows = sqlx::query_as::<_, LifecycleRuleRow>(
                "SELECT * FROM lifecycle_rules WHERE enabled = 1 ORDER BY bucket_id, id",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl UserRepo for SqliteStore {
        async fn ensure_user(
            &self,
            access_key_id: &str,
            secret_access_key: &str,
        ) -> MetadataResult<i64> {
            if let Some(id) =
                sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE access_key_id = ?")
                    .bind(access_key_id)
                    .fetch_optional(&self.pool)
                    .await?
            {
                return Ok(id);
            }
            let res = sqlx::query(
                "INSERT INTO users (access_key_id, secret_access_key, status, created_at) \
                 VALUES (?, ?, 'active', ?)",
            )
            .bind(access_key_id)
            .bind(secret_access_key)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(res.last_insert_rowid())
        }

        async fn find_user_by_access_key(
            &self,
            access_key_id: &str,
        ) -> MetadataResult<Option<UserRow>> {
            let row = sqlx::query_as::<_, UserRow>(
                "SELECT * FROM users WHERE access_key_id = ? AND status = 'active'",
            )
            .bind(access_key_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(""), "%");
        assert_eq!(like_pattern("logs/"), "logs/%");
        assert_eq!(like_pattern("a%b_c\\d"), "a\\%b\\_c\\\\d%");
    }
}
