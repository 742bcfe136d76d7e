use std::future::Future;
use std::time::Duration;

/// Bounded retry schedule with an optionally growing pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made before giving up, never less than one
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Growth of the delay per consecutive failure, 1 keeps it fixed
    pub factor: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            factor: 1,
            max_delay: delay,
        }
    }

    /// Unbounded attempts with a delay doubling from `base` up to `max`.
    pub const fn backoff(base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            base_delay: base,
            factor: 2,
            max_delay: max,
        }
    }

    /// Pause to observe after `failures` consecutive failures.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);

        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay.max(self.base_delay))
    }

    /// Runs `operation` until it yields a value or the attempts run out.
    ///
    /// The closure receives the 1-based attempt number. No delay follows the
    /// final attempt.
    pub async fn retry<T, F, Fut>(&self, mut operation: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            if let Some(value) = operation(attempt).await {
                return Some(value);
            }
            if attempt < attempts {
                tokio::time::sleep(self.delay_after(attempt)).await;
            }
        }

        None
    }
}
