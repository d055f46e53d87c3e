//! The live, in-flight object representing one mirror attempt.
//!
//! A `Downloadable` is created by the resource manager per mirror attempt,
//! owned by the download queue while live, and destroyed after its terminal
//! event. It holds the resource id as a value, never a reference back to the
//! task that owns it; event routing looks the id up in maps owned by the
//! queue and the manager.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::types::{DownloadPriority, FileMirror};

/// Progress descriptor for a downloadable.
///
/// `total_unit_count` is the expected byte count plus one trailing unit that
/// accounts for the atomic file-move step; the move unit completes only once
/// the result has been committed to the cache path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Units completed so far (bytes transferred, plus the move unit).
    pub completed_unit_count: u64,
    /// Total units expected (total bytes plus the move unit).
    pub total_unit_count: u64,
}

impl DownloadProgress {
    /// Completed fraction in `0.0..=1.0`; zero while the total is unknown.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total_unit_count == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.completed_unit_count as f64 / self.total_unit_count as f64
        }
    }
}

/// One mirror attempt, live while the queue owns it.
///
/// All mutable state is interior and thread-safe; the value is shared as
/// `Arc<Downloadable>` between the queue, the processor driving it, and the
/// manager's task bookkeeping.
pub struct Downloadable {
    identifier: String,
    mirror: FileMirror,
    priority: AtomicU8,
    transferred_bytes: AtomicU64,
    total_bytes: AtomicU64,
    moved: AtomicBool,
    terminal: AtomicBool,
    paused: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl Downloadable {
    /// Create a downloadable for one mirror attempt.
    ///
    /// The identifier equals the owning resource's id.
    pub fn new(identifier: impl Into<String>, mirror: FileMirror, priority: DownloadPriority) -> Self {
        Self {
            identifier: identifier.into(),
            mirror,
            priority: AtomicU8::new(priority.rank()),
            transferred_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            moved: AtomicBool::new(false),
            terminal: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// The owning resource's id.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The mirror this attempt targets.
    #[must_use]
    pub const fn mirror(&self) -> &FileMirror {
        &self.mirror
    }

    /// Shorthand for the mirror's location string.
    #[must_use]
    pub fn location(&self) -> &str {
        self.mirror.location()
    }

    /// Current queue priority.
    #[must_use]
    pub fn priority(&self) -> DownloadPriority {
        DownloadPriority::from_rank(self.priority.load(Ordering::Relaxed))
    }

    /// Reassign the queue priority.
    pub fn set_priority(&self, priority: DownloadPriority) {
        self.priority.store(priority.rank(), Ordering::Relaxed);
    }

    /// Record the start of the transfer. Idempotent.
    pub fn start(&self) {
        let mut started = self.started_at.lock().unwrap();
        if started.is_none() {
            *started = Some(Utc::now());
        }
    }

    /// Mark the attempt paused; processors consult this before dispatching.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Clear the paused flag.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Whether the attempt is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Request cancellation of the in-flight transfer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Update the cumulative transferred byte count.
    pub fn set_transferred_bytes(&self, bytes: u64) {
        self.transferred_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Bytes transferred so far.
    #[must_use]
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Record the expected total byte count once the transport reports it.
    pub fn set_total_bytes(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Expected total byte count; zero while unknown.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Mark the trailing file-move unit complete.
    pub fn mark_moved(&self) {
        self.moved.store(true, Ordering::Release);
    }

    /// Record the terminal timestamp. Idempotent.
    pub fn mark_finished(&self) {
        let mut finished = self.finished_at.lock().unwrap();
        if finished.is_none() {
            *finished = Some(Utc::now());
        }
    }

    /// Claim the right to deliver this downloadable's terminal event.
    ///
    /// Exactly one caller ever wins; a processor must only emit
    /// `download_finished` or `download_failed` after winning the latch, which
    /// is what guarantees the two are mutually exclusive.
    #[must_use]
    pub fn try_terminate(&self) -> bool {
        self.terminal
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether a terminal event has been claimed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    /// When the transfer started, if it has.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().unwrap()
    }

    /// When the attempt reached its terminal event, if it has.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock().unwrap()
    }

    /// The current progress descriptor.
    #[must_use]
    pub fn progress(&self) -> DownloadProgress {
        let moved = u64::from(self.moved.load(Ordering::Acquire));
        DownloadProgress {
            completed_unit_count: self.transferred_bytes() + moved,
            total_unit_count: self.total_bytes() + 1,
        }
    }
}

impl fmt::Debug for Downloadable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloadable")
            .field("identifier", &self.identifier)
            .field("mirror", &self.mirror.id())
            .field("location", &self.mirror.location())
            .field("priority", &self.priority())
            .field("transferred_bytes", &self.transferred_bytes())
            .field("total_bytes", &self.total_bytes())
            .field("terminal", &self.is_terminal())
            .finish_non_exhaustive()
    }
}
