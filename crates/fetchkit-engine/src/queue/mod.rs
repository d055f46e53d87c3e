//! Download queue orchestration.
//!
//! The queue owns the admitted processors, admission-controls pending work
//! under the simultaneous-download ceiling, dispatches downloadables to the
//! first processor that claims them, and relays processor events to its
//! single logical observer (the resource manager).
//!
//! # Concurrency Model
//!
//! - Queue bookkeeping is a pure sync state machine behind a `Mutex`; the
//!   lock is never held across an await
//! - A single long-lived runner drains the queue, woken by `Notify`
//! - Transfers run in spawned tasks; completion flows back through the
//!   `ProcessorObserver` implementation on the queue itself

mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Notify;

use fetchkit_core::ports::{Processor, ProcessorObserver, QueueObserver};
use fetchkit_core::resource::{DownloadError, Downloadable};

pub use state::QueueMetrics;
use state::QueueState;

/// Default simultaneous-download ceiling.
pub const DEFAULT_SIMULTANEOUS_DOWNLOADS: u32 = 4;

/// Configuration for a download queue.
#[derive(Clone, Debug)]
pub struct DownloadQueueConfig {
    /// Label used in logs (e.g. "main", "priority").
    pub label: String,
    /// Simultaneous-download ceiling; values below 1 clamp to 1.
    pub simultaneous_downloads: u32,
}

impl Default for DownloadQueueConfig {
    fn default() -> Self {
        Self {
            label: "main".to_string(),
            simultaneous_downloads: DEFAULT_SIMULTANEOUS_DOWNLOADS,
        }
    }
}

impl DownloadQueueConfig {
    /// Create a config with a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Set the simultaneous-download ceiling.
    #[must_use]
    pub const fn with_simultaneous_downloads(mut self, ceiling: u32) -> Self {
        self.simultaneous_downloads = ceiling;
        self
    }
}

/// Admission-controlled dispatch queue over a set of processors.
pub struct DownloadQueue {
    config: DownloadQueueConfig,
    processors: RwLock<Vec<Arc<dyn Processor>>>,
    state: Mutex<QueueState>,
    notify: Notify,
    runner_started: AtomicBool,
    observer: Mutex<Option<Weak<dyn QueueObserver>>>,
    self_ref: Weak<Self>,
}

impl DownloadQueue {
    /// Create a queue. The dispatch runner starts lazily on first admission.
    #[must_use]
    pub fn new(config: DownloadQueueConfig) -> Arc<Self> {
        let state = QueueState::new(config.simultaneous_downloads);
        Arc::new_cyclic(|weak| Self {
            config,
            processors: RwLock::new(Vec::new()),
            state: Mutex::new(state),
            notify: Notify::new(),
            runner_started: AtomicBool::new(false),
            observer: Mutex::new(None),
            self_ref: weak.clone(),
        })
    }

    /// Register the queue's single logical observer.
    pub fn set_observer(&self, observer: Weak<dyn QueueObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    /// Admit a processor and wire it to this queue.
    pub fn add_processor(&self, processor: Arc<dyn Processor>) {
        if let Some(queue) = self.self_ref.upgrade() {
            let observer: Arc<dyn ProcessorObserver> = queue;
            processor.set_observer(Arc::downgrade(&observer));
        }
        self.processors.write().unwrap().push(processor);
        self.notify.notify_one();
    }

    /// Remove a previously admitted processor.
    pub fn remove_processor(&self, processor: &Arc<dyn Processor>) {
        self.processors
            .write()
            .unwrap()
            .retain(|p| !Arc::ptr_eq(p, processor));
    }

    /// Admit a downloadable at the tail. Returns `false` on duplicates.
    pub fn enqueue(&self, downloadable: Arc<Downloadable>) -> bool {
        let admitted = self.state.lock().unwrap().enqueue(downloadable);
        if admitted {
            self.ensure_runner();
            self.notify.notify_one();
        }
        admitted
    }

    /// Re-admit a retry ahead of fresh work of the same priority.
    pub fn enqueue_retry(&self, downloadable: Arc<Downloadable>) -> bool {
        let admitted = self.state.lock().unwrap().enqueue_retry(downloadable);
        if admitted {
            self.ensure_runner();
            self.notify.notify_one();
        }
        admitted
    }

    /// Change the simultaneous-download ceiling, effective immediately.
    ///
    /// Lowering the ceiling under the in-flight count lets the excess drain;
    /// no new work admits until it has.
    pub fn set_simultaneous_downloads(&self, ceiling: u32) {
        self.state.lock().unwrap().set_ceiling(ceiling);
        tracing::info!(
            target: "fetchkit.engine",
            queue = %self.config.label,
            ceiling = ceiling.max(1),
            "Simultaneous-download ceiling changed"
        );
        self.notify.notify_one();
    }

    /// The effective ceiling.
    pub fn simultaneous_downloads(&self) -> u32 {
        self.state.lock().unwrap().ceiling()
    }

    /// Halt or resume admission. Queued work is retained while halted.
    pub fn set_active(&self, active: bool) {
        self.state.lock().unwrap().set_active(active);
        if active {
            self.ensure_runner();
            self.notify.notify_one();
        }
    }

    /// Whether admission is running.
    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().is_active()
    }

    /// Cancel a queued or in-flight downloadable.
    ///
    /// A failed terminal event is guaranteed to reach the observer either
    /// way. Returns `false` if the id is unknown.
    pub async fn cancel(&self, identifier: &str) -> bool {
        let queued = self.state.lock().unwrap().remove_pending(identifier);
        if let Some(downloadable) = queued {
            self.finish_cancelled(downloadable).await;
            return true;
        }

        let running = self.state.lock().unwrap().get(identifier);
        if let Some(downloadable) = running {
            tracing::info!(
                target: "fetchkit.engine",
                queue = %self.config.label,
                id = identifier,
                "Cancelling in-flight download"
            );
            downloadable.cancel();
            return true;
        }

        false
    }

    /// Cancel everything, queued and in-flight.
    pub async fn cancel_all(&self) {
        let (queued, running) = {
            let mut state = self.state.lock().unwrap();
            (state.drain_pending(), state.current_downloads())
        };

        tracing::info!(
            target: "fetchkit.engine",
            queue = %self.config.label,
            queued = queued.len(),
            running = running.len(),
            "Cancelling all downloads"
        );

        for downloadable in queued {
            self.finish_cancelled(downloadable).await;
        }
        for downloadable in running {
            downloadable.cancel();
        }
    }

    /// Forward `enqueue_pending` to every processor.
    pub async fn enqueue_pending(&self) {
        let processors = self.processors.read().unwrap().clone();
        for processor in processors {
            processor.enqueue_pending().await;
        }
    }

    /// Number of in-flight downloads.
    pub fn current_download_count(&self) -> usize {
        self.state.lock().unwrap().running_count()
    }

    /// Number of queued downloads.
    pub fn queued_download_count(&self) -> usize {
        self.state.lock().unwrap().pending_count()
    }

    /// In-flight downloads followed by queued ones.
    pub fn downloads(&self) -> Vec<Arc<Downloadable>> {
        let state = self.state.lock().unwrap();
        let mut all = state.current_downloads();
        all.extend(state.queued_downloads());
        all
    }

    /// Queued downloads in dispatch order.
    pub fn queued_downloads(&self) -> Vec<Arc<Downloadable>> {
        self.state.lock().unwrap().queued_downloads()
    }

    /// In-flight downloads, oldest dispatch first.
    pub fn current_downloads(&self) -> Vec<Arc<Downloadable>> {
        self.state.lock().unwrap().current_downloads()
    }

    /// Whether the id is queued or in-flight.
    pub fn has_download(&self, identifier: &str) -> bool {
        self.state.lock().unwrap().contains(identifier)
    }

    /// The downloadable for an id, if queued or in-flight.
    pub fn download(&self, identifier: &str) -> Option<Arc<Downloadable>> {
        self.state.lock().unwrap().get(identifier)
    }

    /// Whether the id is in-flight right now.
    pub fn is_downloading(&self, identifier: &str) -> bool {
        self.state.lock().unwrap().is_downloading(identifier)
    }

    /// Current counter values.
    pub fn metrics(&self) -> QueueMetrics {
        self.state.lock().unwrap().metrics()
    }

    /// Reset the counters to zero.
    pub fn reset_metrics(&self) {
        self.state.lock().unwrap().reset_metrics();
    }

    /// Start the dispatch runner if it isn't running yet. Idempotent.
    fn ensure_runner(&self) {
        if self
            .runner_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let Some(queue) = self.self_ref.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                queue.run_loop().await;
            });
        }
    }

    /// The dispatch loop: drain admissible work, then wait for a wake-up.
    async fn run_loop(&self) {
        loop {
            self.dispatch_available().await;
            self.notify.notified().await;
        }
    }

    /// Admit work while the ceiling and processors allow.
    async fn dispatch_available(&self) {
        loop {
            let processors = self.processors.read().unwrap().clone();
            if processors.is_empty() {
                return;
            }

            // Entries no processor claims at all fail terminally; entries
            // whose only matching processor is paused remain queued
            let orphans = self
                .state
                .lock()
                .unwrap()
                .remove_unclaimed(|d| processors.iter().any(|p| p.can_process(d)));
            for downloadable in orphans {
                self.finish_unclaimed(downloadable).await;
            }

            let next = self
                .state
                .lock()
                .unwrap()
                .next_dispatchable(|d| {
                    processors.iter().any(|p| p.is_active() && p.can_process(d))
                });
            let Some(downloadable) = next else {
                return;
            };

            let processor = processors
                .iter()
                .find(|p| p.is_active() && p.can_process(&downloadable))
                .cloned();
            let Some(processor) = processor else {
                // The matching processor paused between selection and
                // dispatch; put the entry back without burning a retry slot
                let mut state = self.state.lock().unwrap();
                state.remove_running(downloadable.identifier());
                state.enqueue_retry(downloadable);
                return;
            };

            tracing::debug!(
                target: "fetchkit.engine",
                queue = %self.config.label,
                id = downloadable.identifier(),
                mirror = downloadable.mirror().id(),
                "Dispatching download"
            );

            tokio::spawn(async move {
                processor.process(downloadable).await;
            });
        }
    }

    fn queue_observer(&self) -> Option<Arc<dyn QueueObserver>> {
        self.observer.lock().unwrap().as_ref()?.upgrade()
    }

    /// Deliver the terminal event for a cancelled, never-dispatched entry.
    async fn finish_cancelled(&self, downloadable: Arc<Downloadable>) {
        if !downloadable.try_terminate() {
            return;
        }
        downloadable.cancel();
        downloadable.mark_finished();
        self.state.lock().unwrap().record_failed();
        if let Some(observer) = self.queue_observer() {
            observer
                .download_finished(&downloadable, Err(DownloadError::Cancelled))
                .await;
        }
    }

    /// Deliver the terminal event for an entry nothing can process.
    async fn finish_unclaimed(&self, downloadable: Arc<Downloadable>) {
        if !downloadable.try_terminate() {
            return;
        }
        downloadable.mark_finished();
        self.state.lock().unwrap().record_failed();
        tracing::warn!(
            target: "fetchkit.engine",
            queue = %self.config.label,
            id = downloadable.identifier(),
            location = downloadable.location(),
            "No processor available for download"
        );
        if let Some(observer) = self.queue_observer() {
            let error = DownloadError::no_processor(downloadable.identifier());
            observer.download_finished(&downloadable, Err(error)).await;
        }
    }
}

#[async_trait]
impl ProcessorObserver for DownloadQueue {
    async fn download_began(&self, downloadable: &Arc<Downloadable>) {
        self.state.lock().unwrap().record_began();
        tracing::info!(
            target: "fetchkit.engine",
            queue = %self.config.label,
            id = downloadable.identifier(),
            mirror = downloadable.mirror().id(),
            "Download began"
        );
        if let Some(observer) = self.queue_observer() {
            observer.download_started(downloadable).await;
        }
    }

    async fn bytes_transferred(
        &self,
        downloadable: &Arc<Downloadable>,
        bytes_written: u64,
        total_expected: Option<u64>,
    ) {
        // Byte accounting lives on the downloadable; nothing to track here
        tracing::trace!(
            target: "fetchkit.engine",
            queue = %self.config.label,
            id = downloadable.identifier(),
            bytes_written,
            total_expected,
            "Transfer progress"
        );
    }

    async fn download_finished(&self, downloadable: &Arc<Downloadable>, temp_file: PathBuf) {
        {
            let mut state = self.state.lock().unwrap();
            state.remove_running(downloadable.identifier());
            state.record_completed();
        }
        if let Some(observer) = self.queue_observer() {
            observer.download_finished(downloadable, Ok(temp_file)).await;
        }
        self.notify.notify_one();
    }

    async fn download_failed(&self, downloadable: &Arc<Downloadable>, error: DownloadError) {
        {
            let mut state = self.state.lock().unwrap();
            // A cancel can race dispatch; the entry may still be pending
            if state.remove_running(downloadable.identifier()).is_none() {
                state.remove_pending(downloadable.identifier());
            }
            state.record_failed();
        }
        if let Some(observer) = self.queue_observer() {
            observer.download_finished(downloadable, Err(error)).await;
        }
        self.notify.notify_one();
    }
}
