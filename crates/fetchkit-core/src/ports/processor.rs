//! Processor port definition.
//!
//! A processor is a transport-specific executor: it advertises which
//! downloadables it can handle and drives a single transfer to a temporary
//! file, reporting lifecycle events through an observer.
//!
//! # Contract
//!
//! - `process` is only called for downloadables `can_process` claimed
//! - Terminal events are mutually exclusive per downloadable: a processor
//!   must win the downloadable's terminal latch before emitting either
//!   `download_finished` or `download_failed`
//! - A paused processor buffers incoming work and replays it on
//!   `resume` / `enqueue_pending`

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::resource::{DownloadError, Downloadable};

/// Observer contract a processor reports transfer events through.
#[async_trait]
pub trait ProcessorObserver: Send + Sync {
    /// The transfer has begun.
    async fn download_began(&self, downloadable: &Arc<Downloadable>);

    /// Bytes were written; `total_expected` is `None` while unknown.
    async fn bytes_transferred(
        &self,
        downloadable: &Arc<Downloadable>,
        bytes_written: u64,
        total_expected: Option<u64>,
    );

    /// The transfer completed; the payload sits at `temp_file`.
    async fn download_finished(&self, downloadable: &Arc<Downloadable>, temp_file: PathBuf);

    /// The transfer failed.
    async fn download_failed(&self, downloadable: &Arc<Downloadable>, error: DownloadError);
}

/// Port for a transport-specific executor.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Whether this processor can execute the downloadable.
    fn can_process(&self, downloadable: &Downloadable) -> bool;

    /// Execute one downloadable.
    ///
    /// Events are delivered through the registered observer; the future
    /// resolves when the transfer reaches a terminal event or the work has
    /// been buffered because the processor is paused.
    async fn process(&self, downloadable: Arc<Downloadable>);

    /// Stop starting new transfers; buffer incoming work.
    async fn pause(&self);

    /// Accept new transfers again and replay buffered work.
    async fn resume(&self);

    /// Whether the processor is accepting work.
    fn is_active(&self) -> bool;

    /// Replay any work buffered while paused.
    async fn enqueue_pending(&self);

    /// Register the observer transfer events are delivered to.
    fn set_observer(&self, observer: Weak<dyn ProcessorObserver>);
}
