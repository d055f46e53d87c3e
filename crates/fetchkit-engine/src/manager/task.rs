//! Manager-level bookkeeping for one resource across mirror attempts.

use std::sync::Arc;

use fetchkit_core::ports::TaskSnapshot;
use fetchkit_core::resource::{
    DownloadPriority, DownloadRequest, Downloadable, FileMirror, RequestOptions, Resource,
    StoragePriority,
};

/// Which queue a task's downloadables are admitted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum QueueKind {
    Normal,
    Priority,
}

/// One resource's download across mirror fallbacks and retries.
///
/// Exists from the first uncached request until terminal success, terminal
/// failure, or cancellation. The task owns its current downloadable; the
/// downloadable only carries the resource id back.
pub(crate) struct DownloadTask {
    pub(crate) resource: Resource,
    pub(crate) request: DownloadRequest,
    pub(crate) current: Arc<Downloadable>,
    /// Mirrors left to fall back to; strictly shrinking except in the
    /// main-mirror retry phase, which consumes `retries_left` instead.
    pub(crate) remaining: Vec<FileMirror>,
    pub(crate) retries_left: u32,
    /// 1-based attempt counter across all mirrors.
    pub(crate) attempt: u32,
    pub(crate) storage_priority: StoragePriority,
    pub(crate) download_priority: DownloadPriority,
    pub(crate) queue_kind: QueueKind,
    pub(crate) admitted: bool,
    pub(crate) cancelled: bool,
}

impl DownloadTask {
    pub(crate) fn new(
        resource: Resource,
        request: DownloadRequest,
        current: Arc<Downloadable>,
        remaining: Vec<FileMirror>,
        retries_left: u32,
        options: RequestOptions,
        queue_kind: QueueKind,
    ) -> Self {
        Self {
            resource,
            request,
            current,
            remaining,
            retries_left,
            attempt: 1,
            storage_priority: options.storage_priority,
            download_priority: options.download_priority,
            queue_kind,
            admitted: false,
            cancelled: false,
        }
    }

    /// Raise the storage priority; downgrades are ignored.
    pub(crate) fn upgrade_storage_priority(&mut self, priority: StoragePriority) {
        if priority > self.storage_priority {
            self.storage_priority = priority;
        }
    }

    /// Immutable view handed to observers.
    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            resource_id: self.resource.id().to_string(),
            mirror_id: self.current.mirror().id().to_string(),
            mirror_location: self.current.mirror().location().to_string(),
            attempt: self.attempt,
            remaining_mirrors: u32::try_from(self.remaining.len()).unwrap_or(u32::MAX),
            download_priority: self.download_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> DownloadTask {
        let mirror = FileMirror::new("m0", "https://example.com/r");
        let resource = Resource::new("r", mirror.clone());
        let downloadable = Arc::new(Downloadable::new(
            "r",
            mirror,
            DownloadPriority::Normal,
        ));
        DownloadTask::new(
            resource,
            DownloadRequest::new("r", "r"),
            downloadable,
            Vec::new(),
            3,
            RequestOptions::default(),
            QueueKind::Normal,
        )
    }

    #[test]
    fn storage_priority_only_moves_upward() {
        let mut t = task();
        assert_eq!(t.storage_priority, StoragePriority::Cached);

        t.upgrade_storage_priority(StoragePriority::Permanent);
        assert_eq!(t.storage_priority, StoragePriority::Permanent);

        t.upgrade_storage_priority(StoragePriority::Cached);
        assert_eq!(t.storage_priority, StoragePriority::Permanent);
    }

    #[test]
    fn snapshot_reflects_current_attempt() {
        let t = task();
        let snapshot = t.snapshot();
        assert_eq!(snapshot.resource_id, "r");
        assert_eq!(snapshot.mirror_id, "m0");
        assert_eq!(snapshot.attempt, 1);
        assert_eq!(snapshot.remaining_mirrors, 0);
    }
}
