//! Interval timer
//!
//! Monotonic "has this much time elapsed since the last reset" gate used by
//! every periodic activity of the node. Time is passed in explicitly so the
//! same code runs against `embassy_time::Instant::now()` on the board and a
//! simulated clock in tests.

use embassy_time::{Duration, Instant};

use crate::config::ConfigError;

/// Fixed-interval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTimer {
    interval: Duration,
    /// `None` until the first reset of a timer created expired
    last_fired: Option<Instant>,
}

impl IntervalTimer {
    /// Create a timer whose first period starts at `now`
    pub fn new(interval: Duration, now: Instant) -> Result<Self, ConfigError> {
        if interval == Duration::from_ticks(0) {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self {
            interval,
            last_fired: Some(now),
        })
    }

    /// Create a timer that reports elapsed until its first reset
    pub fn expired(interval: Duration) -> Result<Self, ConfigError> {
        if interval == Duration::from_ticks(0) {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self {
            interval,
            last_fired: None,
        })
    }

    /// True once at least one interval has passed since the last reset
    pub fn has_elapsed(&self, now: Instant) -> bool {
        let Some(last_fired) = self.last_fired else {
            return true;
        };
        match now.checked_duration_since(last_fired) {
            Some(elapsed) => elapsed >= self.interval,
            None => false,
        }
    }

    /// Start a new period at `now`
    pub fn reset(&mut self, now: Instant) {
        self.last_fired = Some(now);
    }

    /// Skip to the current period without re-basing on `now`. The timer
    /// elapses again one interval after the most recent scheduled deadline.
    pub fn advance(&mut self, now: Instant) {
        let Some(last_fired) = self.last_fired else {
            self.last_fired = Some(now);
            return;
        };
        let interval = self.interval.as_ticks();
        let periods = now
            .checked_duration_since(last_fired)
            .map(|elapsed| elapsed.as_ticks() / interval)
            .unwrap_or(0)
            .max(1);
        let skipped = Duration::from_ticks(interval.saturating_mul(periods));
        self.last_fired = Some(last_fired + skipped);
    }

    /// Time left until the timer elapses, zero when already elapsed
    pub fn remaining(&self, now: Instant) -> Duration {
        let zero = Duration::from_ticks(0);
        let Some(last_fired) = self.last_fired else {
            return zero;
        };
        let elapsed = now.checked_duration_since(last_fired).unwrap_or(zero);
        self.interval.checked_sub(elapsed).unwrap_or(zero)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
