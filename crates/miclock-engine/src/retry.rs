use std::time::Duration;

/// Bounded capped-exponential retry policy for recoverable errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Attempt counter plus delay schedule for one recovery episode.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        // Shift capped so a large budget cannot overflow the multiplier.
        let exp = self.attempt.min(16);
        let delay = self
            .policy
            .initial_delay
            .saturating_mul(1u32 << exp)
            .min(self.policy.max_delay);
        self.attempt += 1;
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
