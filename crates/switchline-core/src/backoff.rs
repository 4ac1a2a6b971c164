//! Reconnect backoff: exponential doubling up to a cap.
//!
//! Each failed connection attempt doubles the delay until it reaches the
//! configured maximum. The counter resets on the first successful connect
//! after a disconnect, so a flapping link starts over from the base delay.

use std::time::Duration;

/// Exponential backoff for reconnection attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `base` and capped at `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// schedule: the following delay will be `min(2 * delay, max)`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Returns the delay the next call to [`next_delay`](Self::next_delay)
    /// would hand out, without advancing.
    #[must_use]
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Resets the schedule to the base delay.
    ///
    /// Call after a connection attempt succeeds.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
