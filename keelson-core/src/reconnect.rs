//! Reconnect backoff schedule.
//!
//! Computes the delay before each reconnection attempt: the current
//! deterministic interval plus a random jitter of up to one base
//! interval, with the deterministic part doubling toward a cap when
//! one is configured. Jitter spreads reconnect storms from many peers
//! that lost the same endpoint at the same moment.

use std::time::Duration;

use rand::Rng;

/// Per-connector backoff state.
///
/// # Examples
///
/// ```
/// use keelson_core::reconnect::ReconnectTimer;
/// use std::time::Duration;
///
/// let mut timer = ReconnectTimer::new(
///     Duration::from_millis(100),
///     Duration::from_millis(1600),
/// );
/// let first = timer.next_interval();
/// assert!(first >= Duration::from_millis(100));
/// assert!(first <= Duration::from_millis(200));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectTimer {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectTimer {
    /// `base` is the initial interval and the jitter range; `max` caps
    /// the doubling. `max <= base` disables the exponential component.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Deterministic component of the next interval (no jitter).
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Compute the delay before the next attempt and advance the
    /// schedule.
    pub fn next_interval(&mut self) -> Duration {
        let jitter = if self.base.is_zero() {
            Duration::ZERO
        } else {
            let span = self.base.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=span))
        };
        let interval = self.current + jitter;
        if self.max > self.base {
            self.current = (self.current * 2).min(self.max);
        }
        interval
    }

    /// Restart the schedule after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
