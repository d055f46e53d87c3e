//! Resource domain: descriptors, mirrors, the in-flight downloadable, and
//! cache record types.

mod downloadable;
mod errors;
mod records;
mod types;

pub use downloadable::{DownloadProgress, Downloadable};
pub use errors::{DownloadError, DownloadResult};
pub use records::{CacheChange, CacheRecord};
pub use types::{
    DownloadPriority, DownloadRequest, FileMirror, MirrorInfo, MirrorInfoValue, RequestOptions,
    Resource, StoragePriority, WEIGHT_INFO_KEY,
};
