use std::time::Duration;

/// Reconnect attempts allowed after the connection first fails.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Fixed wait before each reconnect attempt.
pub const RECONNECT_DELAY_MS: u64 = 3000;

/// Bounded, fixed-delay reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl ReconnectPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether reconnect attempt number `attempt` (1-based) may be scheduled.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            MAX_RECONNECT_ATTEMPTS,
            Duration::from_millis(RECONNECT_DELAY_MS),
        )
    }
}
