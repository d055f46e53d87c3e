//! Core domain types and port definitions for fetchkit.
//!
//! This crate is pure: resource descriptors, the in-flight downloadable,
//! error and record types, and the trait seams (`CacheIndex`, `Processor`,
//! observers) the engine and its collaborators meet at. No I/O happens here.

#![deny(unused_crate_dependencies)]

pub mod ports;
pub mod resource;
pub mod utils;

// Re-export commonly used types for convenience
pub use ports::{
    CacheIndex, ObserverToken, Processor, ProcessorObserver, QueueObserver, ResourceCompletion,
    ResourceObserver, TaskSnapshot,
};
pub use resource::{
    CacheChange, CacheRecord, DownloadError, DownloadPriority, DownloadProgress, DownloadRequest,
    DownloadResult, Downloadable, FileMirror, MirrorInfo, MirrorInfoValue, RequestOptions,
    Resource, StoragePriority, WEIGHT_INFO_KEY,
};
pub use utils::cache_file_name;

// Silence unused dev-dependency warnings until we add runtime-based tests here
#[cfg(test)]
use tokio_test as _;
