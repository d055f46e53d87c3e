//! Cache index port definition.
//!
//! The persistent metadata store is an external collaborator; this port names
//! the contract the engine requires from it. The index is the sole authority
//! for the `resource id → path` mapping.
//!
//! # Design
//!
//! - Read failures degrade to `Ok(None)` / empty; they are logged by the
//!   implementation, never surfaced as download failures
//! - Write failures are returned as errors and the manager reclassifies them
//!   as download failures (a swallowed cache write would break the
//!   record-implies-file invariant)

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::broadcast;

use crate::resource::{CacheChange, CacheRecord, DownloadResult, StoragePriority};

/// Port for the persistent `resource id → local file record` index.
#[async_trait]
pub trait CacheIndex: Send + Sync {
    /// Look up the record for a resource.
    ///
    /// Returns `Ok(None)` for unknown ids, tombstoned rows, and read
    /// failures.
    async fn get(&self, resource_id: &str) -> DownloadResult<Option<CacheRecord>>;

    /// Insert or refresh the record for a resource.
    ///
    /// An existing record's storage priority is only ever moved upward;
    /// `put` with `Cached` over a `Permanent` record keeps `Permanent`.
    async fn put(
        &self,
        resource_id: &str,
        path: &Path,
        storage_priority: StoragePriority,
        size: u64,
    ) -> DownloadResult<CacheRecord>;

    /// Upgrade the record's storage priority.
    ///
    /// Returns `true` if a record changed. Downgrades are a no-op.
    async fn upgrade_priority(
        &self,
        resource_id: &str,
        storage_priority: StoragePriority,
    ) -> DownloadResult<bool>;

    /// Refresh the record's last-used timestamp.
    async fn touch(&self, resource_id: &str) -> DownloadResult<()>;

    /// Remove the record for a resource. Returns `true` if one existed.
    async fn delete(&self, resource_id: &str) -> DownloadResult<bool>;

    /// All live records.
    async fn all(&self) -> DownloadResult<Vec<CacheRecord>>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<CacheChange>;
}
