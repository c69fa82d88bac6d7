use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::{QuatiError, Result};

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Opening a workbook tab by name or URL.
    pub const OPEN_RESOURCE: RetryPolicy = RetryPolicy::fixed(5, 60);
    /// Downloading every value of a tab.
    pub const FETCH_ROWS: RetryPolicy = RetryPolicy::fixed(5, 60);
    /// Counting populated cells of a column.
    pub const NEXT_ROW: RetryPolicy = RetryPolicy::fixed(4, 60);
    /// Bulk writes at an anchor cell.
    pub const WRITE_ROWS: RetryPolicy = RetryPolicy::fixed(5, 60);

    const fn fixed(max_attempts: u32, delay_secs: u64) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_secs(delay_secs),
        }
    }

    /// Zero attempts is rejected rather than clamped.
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(QuatiError::InvalidRetryPolicy);
        }
        Ok(Self {
            max_attempts,
            delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// The first success is returned as-is. Each failure before the last
    /// attempt is logged and followed by a pause of [`RetryPolicy::delay`];
    /// the final failure is wrapped in [`QuatiError::RetriesExhausted`].
    ///
    /// Nothing is rolled back between attempts. A write that partially
    /// applied before failing will be applied again, so callers must only
    /// pass operations that are safe to repeat.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed, waiting {}s",
                        self.delay.as_secs_f64()
                    );
                    if !self.delay.is_zero() {
                        sleep(self.delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(operation = label, attempts = attempt, error = %e, "Giving up");
                    return Err(QuatiError::RetriesExhausted {
                        operation: label.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}

impl TryFrom<&RetryConfig> for RetryPolicy {
    type Error = QuatiError;

    fn try_from(cfg: &RetryConfig) -> Result<Self> {
        RetryPolicy::new(cfg.max_attempts, Duration::from_secs(cfg.delay_seconds))
    }
}
