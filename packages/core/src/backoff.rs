//! Deterministic exponential backoff.

use std::time::{Duration, Instant};

/// Default wait before the first re-poll.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(100);
/// Default cap on a single wait.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(100);
/// Default growth factor between waits.
pub const DEFAULT_FACTOR: u32 = 2;

/// Exponential backoff without jitter.
///
/// The n-th call to [`Backoff::next_delay`] yields `min * factor^n`, capped at
/// `max`, so the sequence is non-decreasing.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: u32,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELAY, DEFAULT_MAX_DELAY, DEFAULT_FACTOR)
    }
}

impl Backoff {
    /// Creates a backoff. A floor above the ceiling is lowered to the ceiling.
    pub fn new(min: Duration, max: Duration, factor: u32) -> Self {
        Self {
            min: min.min(max),
            max,
            factor: factor.max(1),
            attempt: 0,
        }
    }

    /// Returns the next wait and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .factor
            .checked_pow(self.attempt)
            .and_then(|multiplier| self.min.checked_mul(multiplier))
            .map_or(self.max, |delay| delay.min(self.max));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Time source for the poll loop.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
