//! `SQLite` implementation of the `CacheIndex` port.
//!
//! The index is the sole authority for the `resource id → path` mapping.
//! Reads degrade to misses (a download is always a valid fallback); writes
//! surface their errors so the manager can reclassify them as download
//! failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

use fetchkit_core::ports::CacheIndex;
use fetchkit_core::resource::{
    CacheChange, CacheRecord, DownloadError, DownloadResult, StoragePriority,
};

/// Capacity of the change-notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// `SQLite`-backed cache index.
///
/// The pool serializes writes; reads run concurrently. A record whose file
/// has disappeared from disk is tombstoned at read time so the
/// record-implies-file invariant holds for every row this index returns.
pub struct SqliteCacheIndex {
    pool: SqlitePool,
    changes: broadcast::Sender<CacheChange>,
}

impl SqliteCacheIndex {
    /// Create an index over an initialized pool (see [`crate::setup`]).
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    async fn fetch_record(&self, resource_id: &str) -> Result<Option<CacheRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT resource_id, path, storage_priority, size, created_at, last_used_at
            FROM cache_records
            WHERE resource_id = ?
            "#,
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_record))
    }

    async fn tombstone(&self, resource_id: &str) {
        let result = sqlx::query("DELETE FROM cache_records WHERE resource_id = ?")
            .bind(resource_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                tracing::warn!(
                    target: "fetchkit.cache",
                    resource_id,
                    "Tombstoned record whose file is missing on disk"
                );
                let _ = self.changes.send(CacheChange::Removed {
                    resource_id: resource_id.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    target: "fetchkit.cache",
                    resource_id,
                    error = %e,
                    "Failed to tombstone stale record"
                );
            }
        }
    }
}

#[async_trait]
impl CacheIndex for SqliteCacheIndex {
    async fn get(&self, resource_id: &str) -> DownloadResult<Option<CacheRecord>> {
        let record = match self.fetch_record(resource_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    target: "fetchkit.cache",
                    resource_id,
                    error = %e,
                    "Index read failed; treating as miss"
                );
                return Ok(None);
            }
        };

        let Some(record) = record else {
            return Ok(None);
        };

        if !record.path.exists() {
            self.tombstone(resource_id).await;
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn put(
        &self,
        resource_id: &str,
        path: &Path,
        storage_priority: StoragePriority,
        size: u64,
    ) -> DownloadResult<CacheRecord> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO cache_records (
                resource_id, path, storage_priority, size, created_at, last_used_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_id) DO UPDATE SET
                path = excluded.path,
                size = excluded.size,
                last_used_at = excluded.last_used_at,
                storage_priority = CASE
                    WHEN cache_records.storage_priority = 'permanent' THEN 'permanent'
                    ELSE excluded.storage_priority
                END
            "#,
        )
        .bind(resource_id)
        .bind(path.to_string_lossy().into_owned())
        .bind(storage_priority.as_str())
        .bind(i64::try_from(size).unwrap_or(i64::MAX))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| DownloadError::cache_write(e.to_string()))?;

        let record = self
            .fetch_record(resource_id)
            .await
            .map_err(|e| DownloadError::cache_write(e.to_string()))?
            .ok_or_else(|| DownloadError::cache_write("record vanished after upsert"))?;

        let _ = self.changes.send(CacheChange::Inserted(record.clone()));

        tracing::debug!(
            target: "fetchkit.cache",
            resource_id,
            path = %record.path.display(),
            priority = %record.storage_priority,
            size = record.size,
            "Record upserted"
        );

        Ok(record)
    }

    async fn upgrade_priority(
        &self,
        resource_id: &str,
        storage_priority: StoragePriority,
    ) -> DownloadResult<bool> {
        // Downgrades are a no-op; the priority only moves upward in-session.
        if storage_priority != StoragePriority::Permanent {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE cache_records
            SET storage_priority = 'permanent', last_used_at = ?
            WHERE resource_id = ? AND storage_priority = 'cached'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(resource_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DownloadError::cache_write(e.to_string()))?;

        let changed = result.rows_affected() > 0;
        if changed {
            tracing::info!(target: "fetchkit.cache", resource_id, "Record upgraded to permanent");
            let _ = self.changes.send(CacheChange::Upgraded {
                resource_id: resource_id.to_string(),
                storage_priority,
            });
        }

        Ok(changed)
    }

    async fn touch(&self, resource_id: &str) -> DownloadResult<()> {
        sqlx::query("UPDATE cache_records SET last_used_at = ? WHERE resource_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(resource_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DownloadError::cache_write(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, resource_id: &str) -> DownloadResult<bool> {
        let result = sqlx::query("DELETE FROM cache_records WHERE resource_id = ?")
            .bind(resource_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DownloadError::cache_write(e.to_string()))?;

        let removed = result.rows_affected() > 0;
        if removed {
            let _ = self.changes.send(CacheChange::Removed {
                resource_id: resource_id.to_string(),
            });
        }

        Ok(removed)
    }

    async fn all(&self) -> DownloadResult<Vec<CacheRecord>> {
        let rows = match sqlx::query(
            r#"
            SELECT resource_id, path, storage_priority, size, created_at, last_used_at
            FROM cache_records
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(target: "fetchkit.cache", error = %e, "Index scan failed");
                return Ok(Vec::new());
            }
        };

        Ok(rows.iter().filter_map(row_to_record).collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }
}

/// Map a row to a record; malformed rows are skipped with a warning.
fn row_to_record(row: &SqliteRow) -> Option<CacheRecord> {
    let resource_id: String = row.try_get("resource_id").ok()?;
    let path: String = row.try_get("path").ok()?;
    let storage_priority: String = row.try_get("storage_priority").ok()?;
    let size: i64 = row.try_get("size").ok()?;
    let created_at: String = row.try_get("created_at").ok()?;
    let last_used_at: String = row.try_get("last_used_at").ok()?;

    let created_at = parse_timestamp(&resource_id, &created_at)?;
    let last_used_at = parse_timestamp(&resource_id, &last_used_at)?;

    Some(CacheRecord {
        resource_id,
        path: PathBuf::from(path),
        storage_priority: StoragePriority::parse(&storage_priority),
        size: u64::try_from(size).unwrap_or(0),
        created_at,
        last_used_at,
    })
}

fn parse_timestamp(resource_id: &str, raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(
                target: "fetchkit.cache",
                resource_id,
                raw,
                error = %e,
                "Skipping row with malformed timestamp"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;

    async fn index_with_file(dir: &tempfile::TempDir, name: &str) -> (SqliteCacheIndex, PathBuf) {
        let pool = setup_test_database().await.unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, b"payload").unwrap();
        (SqliteCacheIndex::new(pool), path)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let (index, path) = index_with_file(&dir, "res-1").await;

        let record = index
            .put("res-1", &path, StoragePriority::Cached, 7)
            .await
            .unwrap();
        assert_eq!(record.resource_id, "res-1");
        assert_eq!(record.size, 7);
        assert_eq!(record.storage_priority, StoragePriority::Cached);

        let fetched = index.get("res-1").await.unwrap().unwrap();
        assert_eq!(fetched.path, path);
    }

    #[tokio::test]
    async fn get_unknown_is_none() {
        let pool = setup_test_database().await.unwrap();
        let index = SqliteCacheIndex::new(pool);
        assert!(index.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_file_tombstones_record() {
        let dir = tempfile::tempdir().unwrap();
        let (index, path) = index_with_file(&dir, "res-1").await;

        index
            .put("res-1", &path, StoragePriority::Cached, 7)
            .await
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(index.get("res-1").await.unwrap().is_none());
        // Row is gone, not just hidden
        assert!(index.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_never_downgrades_priority() {
        let dir = tempfile::tempdir().unwrap();
        let (index, path) = index_with_file(&dir, "res-1").await;

        index
            .put("res-1", &path, StoragePriority::Permanent, 7)
            .await
            .unwrap();
        let record = index
            .put("res-1", &path, StoragePriority::Cached, 7)
            .await
            .unwrap();

        assert_eq!(record.storage_priority, StoragePriority::Permanent);
    }

    #[tokio::test]
    async fn upgrade_is_monotonic_and_reports_change() {
        let dir = tempfile::tempdir().unwrap();
        let (index, path) = index_with_file(&dir, "res-1").await;

        index
            .put("res-1", &path, StoragePriority::Cached, 7)
            .await
            .unwrap();

        assert!(
            index
                .upgrade_priority("res-1", StoragePriority::Permanent)
                .await
                .unwrap()
        );
        // Second upgrade is a no-op
        assert!(
            !index
                .upgrade_priority("res-1", StoragePriority::Permanent)
                .await
                .unwrap()
        );
        // Downgrade is a no-op
        assert!(
            !index
                .upgrade_priority("res-1", StoragePriority::Cached)
                .await
                .unwrap()
        );

        let record = index.get("res-1").await.unwrap().unwrap();
        assert_eq!(record.storage_priority, StoragePriority::Permanent);
    }

    #[tokio::test]
    async fn delete_removes_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let (index, path) = index_with_file(&dir, "res-1").await;

        index
            .put("res-1", &path, StoragePriority::Cached, 7)
            .await
            .unwrap();

        assert!(index.delete("res-1").await.unwrap());
        assert!(!index.delete("res-1").await.unwrap());
        assert!(index.get("res-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribe_observes_inserts_and_upgrades() {
        let dir = tempfile::tempdir().unwrap();
        let (index, path) = index_with_file(&dir, "res-1").await;
        let mut rx = index.subscribe();

        index
            .put("res-1", &path, StoragePriority::Cached, 7)
            .await
            .unwrap();
        index
            .upgrade_priority("res-1", StoragePriority::Permanent)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            CacheChange::Inserted(record) => assert_eq!(record.resource_id, "res-1"),
            other => panic!("expected insert, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            CacheChange::Upgraded { resource_id, storage_priority } => {
                assert_eq!(resource_id, "res-1");
                assert_eq!(storage_priority, StoragePriority::Permanent);
            }
            other => panic!("expected upgrade, got {other:?}"),
        }
    }
}
