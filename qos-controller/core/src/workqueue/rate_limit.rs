use std::time::Duration;

/// Retries quickly a few times before backing off to a slower, fixed delay.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FastSlow {
    pub fast: Duration,
    pub slow: Duration,
    pub max_fast_attempts: u32,
}

// === impl FastSlow ===

impl Default for FastSlow {
    fn default() -> Self {
        Self {
            fast: Duration::from_secs(1),
            slow: Duration::from_secs(5),
            max_fast_attempts: 5,
        }
    }
}

impl FastSlow {
    /// The delay before the `attempt`th requeue (starting at 1) of an item.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt <= self.max_fast_attempts {
            self.fast
        } else {
            self.slow
        }
    }
}
