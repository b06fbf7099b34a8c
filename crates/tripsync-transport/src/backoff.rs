//! Reconnect backoff schedule

use std::time::Duration;

/// Exponential backoff for reconnect attempts
///
/// Attempt `n` (1-based) waits `base * factor^(n-1)`, capped at `cap`.
/// After `max_attempts` failures the connection is declared dead and no
/// further delay is issued.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt, `None` once the budget is spent
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exp = self.factor.saturating_pow(attempt - 1);
        let delay = self.base.saturating_mul(exp);
        Some(delay.min(self.cap))
    }
}
