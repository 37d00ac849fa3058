//! Deadline helpers for bounded waits.

use std::time::{Duration, Instant};

/// Represents a timeout duration for lock operations.
///
/// - `Some(duration)` - Wait up to this duration
/// - `None` - Wait indefinitely
pub type Timeout = Option<Duration>;

/// A point in time after which waiting stops.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Timeout,
}

impl Deadline {
    /// Starts counting now.
    pub fn after(timeout: Timeout) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.timeout.is_none()
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn has_expired(&self) -> bool {
        self.timeout
            .is_some_and(|timeout| self.start.elapsed() >= timeout)
    }

    /// Clamps `sleep` so it never overshoots the deadline.
    pub fn clamp(&self, sleep: Duration) -> Duration {
        match self.timeout {
            None => sleep,
            Some(timeout) => sleep.min(timeout.saturating_sub(self.start.elapsed())),
        }
    }
}
