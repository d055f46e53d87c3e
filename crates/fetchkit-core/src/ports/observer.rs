//! Observer and completion surfaces exposed by the queue and the manager.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::resource::{DownloadError, DownloadPriority, Downloadable, FileMirror};

/// Immutable view of a manager task, handed to observers.
///
/// Snapshots carry values only; observers never receive references into the
/// manager's mutable state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// The resource this task materializes.
    pub resource_id: String,
    /// Id of the mirror currently being attempted.
    pub mirror_id: String,
    /// Location of the mirror currently being attempted.
    pub mirror_location: String,
    /// 1-based attempt number across mirror fallbacks and retries.
    pub attempt: u32,
    /// Mirrors left to try after the current one.
    pub remaining_mirrors: u32,
    /// Queue ordering key of the task.
    pub download_priority: DownloadPriority,
}

/// Opaque handle identifying one observer registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverToken(pub(crate) u64);

impl ObserverToken {
    /// Construct a token from its raw value.
    ///
    /// Intended for the registry that hands tokens out; callers treat tokens
    /// as opaque.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token value.
    #[must_use]
    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

/// Subscriber to per-task lifecycle events published by the resource manager.
///
/// All methods default to no-ops so observers implement only what they need.
#[async_trait]
#[allow(unused_variables)]
pub trait ResourceObserver: Send + Sync {
    /// A task's current downloadable was dispatched and began transferring.
    async fn did_start_downloading(&self, task: &TaskSnapshot) {}

    /// A mirror attempt failed and the task is moving to the next mirror.
    async fn will_retry_failed_download(
        &self,
        task: &TaskSnapshot,
        failed: &FileMirror,
        next: &FileMirror,
        error: &DownloadError,
    ) {
    }

    /// The task reached a terminal event; `error` is `None` on success.
    async fn did_finish_download(&self, task: &TaskSnapshot, error: Option<&DownloadError>) {}
}

/// The download queue's single logical observer.
///
/// The resource manager implements this to receive terminal events and drive
/// the retry state machine and cache coupling.
#[async_trait]
pub trait QueueObserver: Send + Sync {
    /// A queued downloadable was dispatched and its transfer began.
    async fn download_started(&self, downloadable: &Arc<Downloadable>);

    /// A downloadable reached a terminal event.
    ///
    /// On success the outcome carries the temporary file the payload was
    /// spooled to; committing it into the cache is the observer's job.
    async fn download_finished(
        &self,
        downloadable: &Arc<Downloadable>,
        outcome: Result<PathBuf, DownloadError>,
    );
}

/// Per-resource completion callback.
///
/// Invoked exactly once per registration with `(success, resource_id)` on the
/// terminal resolution of the resource.
pub type ResourceCompletion = Box<dyn FnOnce(bool, &str) + Send + 'static>;
