//! Download queue state machine.
//!
//! This module provides a pure state machine for the queue's bookkeeping.
//! No I/O is performed here and there is no internal locking; the
//! orchestrator (`DownloadQueue`) is responsible for synchronization.
//!
//! # Ordering
//!
//! Pending work dispatches by `(priority desc, admission seq asc)`: high
//! priority overtakes, ties preserve insertion order. Retry re-admissions
//! receive a seq below every live entry so they dispatch ahead of fresh work
//! of the same priority.

use std::cmp::Reverse;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use fetchkit_core::resource::Downloadable;

/// Queue counters, monotonically increasing until a manual reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Downloadables admitted to the queue.
    pub requested: u64,
    /// Transfers that began.
    pub began: u64,
    /// Transfers that finished successfully.
    pub completed: u64,
    /// Transfers that reached a failed terminal event.
    pub failed: u64,
}

impl QueueMetrics {
    /// Transfers processed: began plus failed.
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.began + self.failed
    }

    /// Combine counters from two queues.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            requested: self.requested + other.requested,
            began: self.began + other.began,
            completed: self.completed + other.completed,
            failed: self.failed + other.failed,
        }
    }
}

struct PendingEntry {
    downloadable: Arc<Downloadable>,
    seq: i64,
}

/// Manages the queue's pending and running sets.
///
/// This is a sync type with no internal locking — the caller
/// (`DownloadQueue`) is responsible for synchronization.
pub(crate) struct QueueState {
    pending: Vec<PendingEntry>,
    // Insertion-ordered so the read surface lists oldest running first
    running: IndexMap<String, Arc<Downloadable>>,
    active: bool,
    ceiling: u32,
    next_seq: i64,
    head_seq: i64,
    metrics: QueueMetrics,
}

impl QueueState {
    /// Create a state with the given simultaneous-download ceiling.
    ///
    /// Ceilings below 1 clamp to 1.
    pub(crate) fn new(ceiling: u32) -> Self {
        Self {
            pending: Vec::new(),
            running: IndexMap::new(),
            active: true,
            ceiling: ceiling.max(1),
            next_seq: 0,
            head_seq: 0,
            metrics: QueueMetrics::default(),
        }
    }

    pub(crate) fn set_ceiling(&mut self, ceiling: u32) {
        self.ceiling = ceiling.max(1);
    }

    pub(crate) const fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub(crate) const fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) const fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn contains(&self, identifier: &str) -> bool {
        self.running.contains_key(identifier)
            || self
                .pending
                .iter()
                .any(|entry| entry.downloadable.identifier() == identifier)
    }

    /// Admit a downloadable at the tail. Returns `false` on duplicates.
    pub(crate) fn enqueue(&mut self, downloadable: Arc<Downloadable>) -> bool {
        if self.contains(downloadable.identifier()) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(PendingEntry { downloadable, seq });
        self.metrics.requested += 1;
        true
    }

    /// Re-admit a retry at the head of its priority class.
    pub(crate) fn enqueue_retry(&mut self, downloadable: Arc<Downloadable>) -> bool {
        if self.contains(downloadable.identifier()) {
            return false;
        }
        self.head_seq -= 1;
        self.pending.push(PendingEntry {
            downloadable,
            seq: self.head_seq,
        });
        true
    }

    /// Move the best dispatchable pending entry into the running set.
    ///
    /// `claimed` decides whether any active processor can take the
    /// downloadable right now; entries it rejects stay queued.
    pub(crate) fn next_dispatchable(
        &mut self,
        claimed: impl Fn(&Downloadable) -> bool,
    ) -> Option<Arc<Downloadable>> {
        if !self.active || self.running.len() >= self.ceiling as usize {
            return None;
        }

        let index = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, entry)| claimed(&entry.downloadable))
            .max_by_key(|(_, entry)| {
                (entry.downloadable.priority().rank(), Reverse(entry.seq))
            })
            .map(|(index, _)| index)?;

        let entry = self.pending.remove(index);
        let downloadable = entry.downloadable;
        self.running
            .insert(downloadable.identifier().to_string(), Arc::clone(&downloadable));
        Some(downloadable)
    }

    /// Remove pending entries no processor claims at all.
    pub(crate) fn remove_unclaimed(
        &mut self,
        claimed_by_any: impl Fn(&Downloadable) -> bool,
    ) -> Vec<Arc<Downloadable>> {
        let mut orphaned = Vec::new();
        self.pending.retain(|entry| {
            if claimed_by_any(&entry.downloadable) {
                true
            } else {
                orphaned.push(Arc::clone(&entry.downloadable));
                false
            }
        });
        orphaned
    }

    pub(crate) fn remove_running(&mut self, identifier: &str) -> Option<Arc<Downloadable>> {
        self.running.shift_remove(identifier)
    }

    pub(crate) fn remove_pending(&mut self, identifier: &str) -> Option<Arc<Downloadable>> {
        let index = self
            .pending
            .iter()
            .position(|entry| entry.downloadable.identifier() == identifier)?;
        Some(self.pending.remove(index).downloadable)
    }

    pub(crate) fn drain_pending(&mut self) -> Vec<Arc<Downloadable>> {
        self.pending
            .drain(..)
            .map(|entry| entry.downloadable)
            .collect()
    }

    pub(crate) fn running_count(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending downloadables in dispatch order.
    pub(crate) fn queued_downloads(&self) -> Vec<Arc<Downloadable>> {
        let mut entries: Vec<_> = self
            .pending
            .iter()
            .map(|entry| (entry.downloadable.priority().rank(), entry.seq, &entry.downloadable))
            .collect();
        entries.sort_by_key(|(rank, seq, _)| (Reverse(*rank), *seq));
        entries
            .into_iter()
            .map(|(_, _, downloadable)| Arc::clone(downloadable))
            .collect()
    }

    /// Running downloadables, oldest dispatch first.
    pub(crate) fn current_downloads(&self) -> Vec<Arc<Downloadable>> {
        self.running.values().cloned().collect()
    }

    pub(crate) fn get(&self, identifier: &str) -> Option<Arc<Downloadable>> {
        self.running.get(identifier).cloned().or_else(|| {
            self.pending
                .iter()
                .find(|entry| entry.downloadable.identifier() == identifier)
                .map(|entry| Arc::clone(&entry.downloadable))
        })
    }

    pub(crate) fn is_downloading(&self, identifier: &str) -> bool {
        self.running.contains_key(identifier)
    }

    pub(crate) const fn record_began(&mut self) {
        self.metrics.began += 1;
    }

    pub(crate) const fn record_completed(&mut self) {
        self.metrics.completed += 1;
    }

    pub(crate) const fn record_failed(&mut self) {
        self.metrics.failed += 1;
    }

    pub(crate) const fn metrics(&self) -> QueueMetrics {
        self.metrics
    }

    pub(crate) fn reset_metrics(&mut self) {
        self.metrics = QueueMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchkit_core::resource::{DownloadPriority, FileMirror};

    fn downloadable(id: &str, priority: DownloadPriority) -> Arc<Downloadable> {
        Arc::new(Downloadable::new(
            id,
            FileMirror::new("m", format!("https://example.com/{id}")),
            priority,
        ))
    }

    fn any(_: &Downloadable) -> bool {
        true
    }

    #[test]
    fn ceiling_clamps_to_one() {
        let state = QueueState::new(0);
        assert_eq!(state.ceiling(), 1);

        let mut state = QueueState::new(5);
        state.set_ceiling(0);
        assert_eq!(state.ceiling(), 1);
    }

    #[test]
    fn fifo_within_equal_priority() {
        let mut state = QueueState::new(10);
        state.enqueue(downloadable("a", DownloadPriority::Normal));
        state.enqueue(downloadable("b", DownloadPriority::Normal));

        assert_eq!(state.next_dispatchable(any).unwrap().identifier(), "a");
        assert_eq!(state.next_dispatchable(any).unwrap().identifier(), "b");
        assert!(state.next_dispatchable(any).is_none());
    }

    #[test]
    fn high_priority_overtakes() {
        let mut state = QueueState::new(10);
        state.enqueue(downloadable("low", DownloadPriority::Low));
        state.enqueue(downloadable("normal", DownloadPriority::Normal));
        state.enqueue(downloadable("high", DownloadPriority::High));

        assert_eq!(state.next_dispatchable(any).unwrap().identifier(), "high");
        assert_eq!(state.next_dispatchable(any).unwrap().identifier(), "normal");
        assert_eq!(state.next_dispatchable(any).unwrap().identifier(), "low");
    }

    #[test]
    fn retry_admission_beats_fresh_work_of_same_priority() {
        let mut state = QueueState::new(10);
        state.enqueue(downloadable("fresh-1", DownloadPriority::Normal));
        state.enqueue(downloadable("fresh-2", DownloadPriority::Normal));
        state.enqueue_retry(downloadable("retry", DownloadPriority::Normal));

        assert_eq!(state.next_dispatchable(any).unwrap().identifier(), "retry");
        assert_eq!(state.next_dispatchable(any).unwrap().identifier(), "fresh-1");
    }

    #[test]
    fn ceiling_limits_running() {
        let mut state = QueueState::new(2);
        state.enqueue(downloadable("a", DownloadPriority::Normal));
        state.enqueue(downloadable("b", DownloadPriority::Normal));
        state.enqueue(downloadable("c", DownloadPriority::Normal));

        assert!(state.next_dispatchable(any).is_some());
        assert!(state.next_dispatchable(any).is_some());
        assert!(state.next_dispatchable(any).is_none());
        assert_eq!(state.running_count(), 2);
        assert_eq!(state.pending_count(), 1);

        state.remove_running("a");
        assert!(state.next_dispatchable(any).is_some());
    }

    #[test]
    fn inactive_state_admits_nothing() {
        let mut state = QueueState::new(10);
        state.enqueue(downloadable("a", DownloadPriority::Normal));
        state.set_active(false);

        assert!(state.next_dispatchable(any).is_none());
        assert_eq!(state.pending_count(), 1);

        state.set_active(true);
        assert!(state.next_dispatchable(any).is_some());
    }

    #[test]
    fn unclaimed_entries_stay_queued() {
        let mut state = QueueState::new(10);
        state.enqueue(downloadable("claimed", DownloadPriority::Normal));
        state.enqueue(downloadable("paused-transport", DownloadPriority::High));

        // Higher-priority entry has no willing processor right now
        let next = state
            .next_dispatchable(|d| d.identifier() == "claimed")
            .unwrap();
        assert_eq!(next.identifier(), "claimed");
        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn duplicate_admission_is_rejected() {
        let mut state = QueueState::new(10);
        assert!(state.enqueue(downloadable("a", DownloadPriority::Normal)));
        assert!(!state.enqueue(downloadable("a", DownloadPriority::Normal)));

        state.next_dispatchable(any).unwrap();
        assert!(!state.enqueue(downloadable("a", DownloadPriority::Normal)));
    }

    #[test]
    fn remove_unclaimed_extracts_orphans() {
        let mut state = QueueState::new(10);
        state.enqueue(downloadable("good", DownloadPriority::Normal));
        state.enqueue(downloadable("orphan", DownloadPriority::Normal));

        let orphans = state.remove_unclaimed(|d| d.identifier() == "good");
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].identifier(), "orphan");
        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn metrics_accumulate_and_reset() {
        let mut state = QueueState::new(10);
        state.enqueue(downloadable("a", DownloadPriority::Normal));
        state.record_began();
        state.record_failed();
        state.record_began();
        state.record_completed();

        let metrics = state.metrics();
        assert_eq!(metrics.requested, 1);
        assert_eq!(metrics.began, 2);
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.processed(), 3);

        state.reset_metrics();
        assert_eq!(state.metrics(), QueueMetrics::default());
    }

    #[test]
    fn metrics_merge_sums_counters() {
        let a = QueueMetrics {
            requested: 1,
            began: 2,
            completed: 3,
            failed: 4,
        };
        let b = QueueMetrics {
            requested: 10,
            began: 20,
            completed: 30,
            failed: 40,
        };
        let merged = a.merge(b);
        assert_eq!(merged.requested, 11);
        assert_eq!(merged.processed(), 66);
    }

    #[test]
    fn read_surface_orders_queued_by_dispatch_order() {
        let mut state = QueueState::new(10);
        state.enqueue(downloadable("n1", DownloadPriority::Normal));
        state.enqueue(downloadable("h1", DownloadPriority::High));
        state.enqueue(downloadable("n2", DownloadPriority::Normal));

        let order: Vec<String> = state
            .queued_downloads()
            .iter()
            .map(|d| d.identifier().to_string())
            .collect();
        assert_eq!(order, vec!["h1", "n1", "n2"]);
    }
}
