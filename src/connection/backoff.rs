//! Reconnect backoff policy.

use std::time::Duration;

/// Default delay before the first reconnect attempt after a drop.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);
/// Default ceiling for any single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);
/// Default number of consecutive failed attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Bounded exponential backoff for the reconnect loop.
///
/// The delay doubles with every consecutive failure, starting at
/// `base_delay` and never exceeding `max_delay`. Once `max_attempts`
/// consecutive attempts have failed the manager stops retrying on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Calculates the delay before the next attempt.
    ///
    /// `failures` is the number of consecutive failed attempts so far, so a
    /// freshly dropped connection (zero failures) waits `base_delay`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether `failures` consecutive failures exhaust the retry budget.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}
