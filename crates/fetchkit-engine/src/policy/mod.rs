//! Mirror selection policies.
//!
//! A policy decides which mirror a resource is first attempted from and
//! which mirror (if any) a failed task moves to next. The retry counter it
//! consults lives on the task and is consumed only once the ranked
//! alternatives are exhausted and the main mirror itself keeps failing.

use fetchkit_core::resource::{FileMirror, Resource};

/// Default number of terminal retries of the main mirror.
pub const DEFAULT_MAIN_MIRROR_RETRIES: u32 = 3;

/// The first attempt chosen by a policy, plus the fallback order behind it.
#[derive(Clone, Debug, PartialEq)]
pub struct MirrorSelection {
    /// Mirror to attempt first.
    pub mirror: FileMirror,
    /// Mirrors left to fall back to, in order.
    pub remaining: Vec<FileMirror>,
}

/// Pluggable strategy that orders mirrors and controls retry.
pub trait MirrorPolicy: Send + Sync {
    /// Choose the first mirror for a resource and the fallback order.
    fn first_downloadable(&self, resource: &Resource) -> MirrorSelection;

    /// Choose the mirror to attempt after `failed`.
    ///
    /// `remaining` and `retries_left` belong to the task and are mutated in
    /// place. Returns `None` when the task should fail terminally.
    fn next_downloadable(
        &self,
        resource: &Resource,
        failed: &FileMirror,
        remaining: &mut Vec<FileMirror>,
        retries_left: &mut u32,
    ) -> Option<FileMirror>;

    /// Retry budget a fresh task starts with.
    fn initial_retries(&self) -> u32;
}

/// Default policy: alternatives by descending weight, main mirror last.
///
/// Alternatives are sorted by their `weight` info value (descending, stable
/// ties preserve the caller's order, missing weights count as zero). The main
/// mirror always comes last regardless of its own weight. Once every mirror
/// has failed, the main mirror is re-attempted until the task's retry budget
/// runs out.
#[derive(Clone, Debug)]
pub struct WeightedMirrorPolicy {
    retries: u32,
}

impl WeightedMirrorPolicy {
    /// Create a policy with the given main-mirror retry budget.
    #[must_use]
    pub const fn new(retries: u32) -> Self {
        Self { retries }
    }
}

impl Default for WeightedMirrorPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAIN_MIRROR_RETRIES)
    }
}

impl MirrorPolicy for WeightedMirrorPolicy {
    fn first_downloadable(&self, resource: &Resource) -> MirrorSelection {
        let mut candidates: Vec<FileMirror> = resource.alternatives().to_vec();
        // Stable sort: equal weights keep the caller's order
        candidates.sort_by_key(|mirror| std::cmp::Reverse(mirror.weight().unwrap_or(0)));
        candidates.push(resource.main().clone());

        let mirror = candidates.remove(0);
        MirrorSelection {
            mirror,
            remaining: candidates,
        }
    }

    fn next_downloadable(
        &self,
        resource: &Resource,
        failed: &FileMirror,
        remaining: &mut Vec<FileMirror>,
        retries_left: &mut u32,
    ) -> Option<FileMirror> {
        if !remaining.is_empty() {
            return Some(remaining.remove(0));
        }

        // Retry phase: only the main mirror is re-attempted, and only while
        // the task's budget lasts
        if failed == resource.main() && *retries_left > 0 {
            *retries_left -= 1;
            return Some(resource.main().clone());
        }

        None
    }

    fn initial_retries(&self) -> u32 {
        self.retries
    }
}
