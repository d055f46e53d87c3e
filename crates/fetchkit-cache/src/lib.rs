//! Cache layer for fetchkit: the persistent `SQLite` index and the bounded
//! in-memory hot tier.
//!
//! The index implements the `CacheIndex` port from `fetchkit-core` and is the
//! sole authority for the `resource id → path` mapping. The memory cache sits
//! on top as an LRU of recently materialized payloads.

#![deny(unsafe_code)]

pub mod index;
pub mod memory;
pub mod setup;

pub use index::SqliteCacheIndex;
pub use memory::{CachedPayload, MemoryCache, MemoryCacheConfig};
pub use setup::setup_index_database;
#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;

// Bundled sqlite is linked through sqlx; the direct dependency pins the
// bundled build flags.
use libsqlite3_sys as _;
