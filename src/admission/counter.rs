//! Fixed window counter shared by the per-client limiter and the load shedder.

use std::time::{Duration, Instant};

/// A counter over a recurring, non-overlapping time window.
///
/// The window is anchored at the first hit after a reset rather than at
/// wall-clock boundaries. A window expires once strictly more than its length
/// has elapsed since it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    /// Length of the window
    length: Duration,
    /// When the current window started
    start: Instant,
    /// Hits observed in the current window
    count: u64,
}

impl FixedWindow {
    /// Create an empty window starting at `now`.
    pub fn new(length: Duration, now: Instant) -> Self {
        Self {
            length,
            start: now,
            count: 0,
        }
    }

    /// Whether the window has run its course at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.start) > self.length
    }

    /// Start a new, empty window at `now`.
    pub fn restart(&mut self, now: Instant) {
        self.start = now;
        self.count = 0;
    }

    /// Restart the window if it has expired.
    ///
    /// Returns `true` if a reset happened.
    pub fn maybe_reset(&mut self, now: Instant) -> bool {
        if self.is_expired(now) {
            self.restart(now);
            true
        } else {
            false
        }
    }

    /// Add hits and return the new count.
    pub fn increment(&mut self, hits: u64) -> u64 {
        self.count = self.count.saturating_add(hits);
        self.count
    }

    /// Hits in the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Start of the current window.
    pub fn start(&self) -> Instant {
        self.start
    }
}

/// Round a duration up to whole seconds, as used for `Retry-After`.
pub fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    u64::try_from(millis.div_ceil(1000)).unwrap_or(u64::MAX)
}
