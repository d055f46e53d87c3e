//! Progress gating.
//!
//! Transports report progress per chunk, which on a fast link is a burst of
//! tiny updates nobody can render. The gate admits an update once the
//! configured interval has elapsed since the last admitted one, or once the
//! transfer has advanced by the configured byte stride, whichever happens
//! first. Terminal updates bypass the gate at the call site.

use std::time::{Duration, Instant};

/// Decides which progress updates of one transfer are worth reporting.
pub struct ProgressGate {
    min_interval: Duration,
    byte_stride: u64,
    // Instant and byte count of the last admitted update
    last_admitted: Option<(Instant, u64)>,
}

impl ProgressGate {
    /// Create a gate.
    ///
    /// A zero `byte_stride` disables byte-based admission; updates then pass
    /// on elapsed time alone.
    #[must_use]
    pub const fn new(min_interval: Duration, byte_stride: u64) -> Self {
        Self {
            min_interval,
            byte_stride,
            last_admitted: None,
        }
    }

    /// Whether an update at `transferred` cumulative bytes should be
    /// reported. The first update always is.
    pub fn admit(&mut self, transferred: u64) -> bool {
        let now = Instant::now();
        let due = match self.last_admitted {
            None => true,
            Some((at, bytes)) => {
                now.duration_since(at) >= self.min_interval
                    || (self.byte_stride > 0
                        && transferred.saturating_sub(bytes) >= self.byte_stride)
            }
        };
        if due {
            self.last_admitted = Some((now, transferred));
        }
        due
    }
}
