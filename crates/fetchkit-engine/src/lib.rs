//! fetchkit download engine.
//!
//! Materializes declarative resources (a primary mirror plus ranked
//! alternatives) to local storage: requests deduplicate by resource id,
//! failures fall back across mirrors under a pluggable policy, admission is
//! throttled by a simultaneous-download ceiling, and successes are committed
//! to the cache layer before completions fire.
//!
//! - `manager` - the resource manager orchestrator
//! - `queue` - admission-controlled dispatch over processors
//! - `policy` - mirror ordering and retry strategies
//! - `processor` - the default HTTP transport executor
//! - `progress` - progress gating

// Re-export core types for convenience
pub use fetchkit_core::ports::{
    CacheIndex, ObserverToken, Processor, ProcessorObserver, QueueObserver, ResourceCompletion,
    ResourceObserver, TaskSnapshot,
};
pub use fetchkit_core::resource::{
    CacheChange, CacheRecord, DownloadError, DownloadPriority, DownloadProgress, DownloadRequest,
    DownloadResult, Downloadable, FileMirror, MirrorInfo, MirrorInfoValue, RequestOptions,
    Resource, StoragePriority,
};

mod manager;
mod policy;
mod processor;
mod progress;
mod queue;

pub use manager::{
    ResourceManager, ResourceManagerConfig, ResourceManagerDeps, build_resource_manager,
};
pub use policy::{
    DEFAULT_MAIN_MIRROR_RETRIES, MirrorPolicy, MirrorSelection, WeightedMirrorPolicy,
};
pub use processor::{HttpProcessor, HttpProcessorConfig};
pub use progress::ProgressGate;
pub use queue::{
    DEFAULT_SIMULTANEOUS_DOWNLOADS, DownloadQueue, DownloadQueueConfig, QueueMetrics,
};
