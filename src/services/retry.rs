use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Bounded exponential backoff shared by the quote, collect and poll loops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: multiplier.max(1.0),
            max_delay,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = nanos.min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(capped.round() as u64)
    }

    /// Upper bound of time spent sleeping if every attempt is used.
    pub fn total_delay(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }

    /// Runs `op` until it succeeds, the error is not retryable, or attempts
    /// run out. The last error is returned.
    pub async fn run<T, E, F, Fut, R>(&self, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && retryable(&e) => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(attempt, max = self.max_attempts, ?delay, error = %e, "retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), 2.0, Duration::from_secs(10))
    }
}
