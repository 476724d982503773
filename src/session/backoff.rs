//! Exponential backoff schedule for lock acquisition
//!
//! The schedule starts at an initial delay, doubles after every failed
//! attempt and is capped at a per-attempt maximum. It ends once the delays
//! handed out add up to the total budget. There is no jitter.

use std::time::Duration;

/// Default delay before the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(5);
/// Default cap for a single retry delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1);
/// Default total time spent waiting before giving up
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(30);
/// Floor for a single retry delay; zero delays are raised to this
pub const MIN_DELAY: Duration = Duration::from_millis(1);

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Initial delay (default: 5ms)
    pub initial_delay: Duration,
    /// Maximum delay per attempt (default: 1s)
    pub max_delay: Duration,
    /// Total wait budget (default: 30s)
    pub total_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            total_timeout: DEFAULT_TOTAL_TIMEOUT,
        }
    }
}

impl BackoffPolicy {
    /// Start a fresh delay sequence. Initial and maximum delays below
    /// [`MIN_DELAY`] are raised to it, so only a zero `total_timeout`
    /// disables retrying.
    pub fn schedule(&self) -> Backoff {
        let max_delay = self.max_delay.max(MIN_DELAY);
        Backoff {
            next_delay: self.initial_delay.max(MIN_DELAY).min(max_delay),
            max_delay,
            remaining: self.total_timeout,
        }
    }
}

/// Iterator over successive retry delays
#[derive(Debug, Clone)]
pub struct Backoff {
    next_delay: Duration,
    max_delay: Duration,
    remaining: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining.is_zero() {
            return None;
        }

        let delay = self.next_delay;
        self.remaining = self.remaining.saturating_sub(delay);
        self.next_delay = delay.saturating_mul(2).min(self.max_delay);
        Some(delay)
    }
}
