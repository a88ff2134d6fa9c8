//! Bounded retry with per-attempt timeout and exponential backoff.

use std::future::Future;
use std::time::Duration;

use common::config::FetchConfig;
use common::{Error, Result};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Backoff before attempt `attempt + 1` (1-based `attempt`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// the attempts run out. Only `ExternalFetch` errors and timeouts retry.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(Error::ExternalFetch(format!(
                    "{} timed out after {:?}",
                    label, self.timeout
                ))),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(Error::ExternalFetch(msg)) if attempt < self.max_attempts => {
                    let wait = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label, attempt, self.max_attempts, msg, wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
