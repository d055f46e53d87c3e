//! Cache record and change-notification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::types::StoragePriority;

/// Persistent mapping of a resource id to a local file.
///
/// A record being returned from the index implies its file exists at the
/// recorded path; rows whose files have gone missing are tombstoned and
/// never surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// The resource this record belongs to.
    pub resource_id: String,
    /// Absolute path of the materialized file.
    pub path: PathBuf,
    /// Eviction class of the record.
    pub storage_priority: StoragePriority,
    /// Size of the file in bytes at write time.
    pub size: u64,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last read or refreshed.
    pub last_used_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Whether this record satisfies a request at `required` priority.
    #[must_use]
    pub fn satisfies(&self, required: StoragePriority) -> bool {
        self.storage_priority >= required
    }
}

/// Change notification emitted by a cache index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheChange {
    /// A record was inserted or refreshed.
    Inserted(CacheRecord),
    /// A record's storage priority was upgraded.
    Upgraded {
        /// The affected resource.
        resource_id: String,
        /// The new storage priority.
        storage_priority: StoragePriority,
    },
    /// A record was removed (explicitly or tombstoned).
    Removed {
        /// The affected resource.
        resource_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(priority: StoragePriority) -> CacheRecord {
        CacheRecord {
            resource_id: "res-1".to_string(),
            path: PathBuf::from("/cache/res-1"),
            storage_priority: priority,
            size: 42,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
        }
    }

    #[test]
    fn permanent_satisfies_both_priorities() {
        let r = record(StoragePriority::Permanent);
        assert!(r.satisfies(StoragePriority::Cached));
        assert!(r.satisfies(StoragePriority::Permanent));
    }

    #[test]
    fn cached_does_not_satisfy_permanent() {
        let r = record(StoragePriority::Cached);
        assert!(r.satisfies(StoragePriority::Cached));
        assert!(!r.satisfies(StoragePriority::Permanent));
    }
}
