//! Timeout and retry wrapper for chain fetches.
//!
//! Used by the sync loop only. Read-path verification calls go straight to
//! the engine and fail fast.

use std::future::Future;
use std::time::Duration;

use settlement_telemetry::FETCH_RETRIES;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SettlementConfig;
use crate::domain::{SettlementError, SettlementResult};

/// Per-fetch timeout plus exponential backoff on transient errors.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    timeout: Duration,
    max_retries: u32,
    config: SettlementConfig,
}

impl RetryPolicy {
    /// Build the policy from the engine configuration.
    pub fn from_config(config: &SettlementConfig) -> Self {
        Self {
            timeout: config.fetch_timeout(),
            max_retries: config.max_retries,
            config: config.clone(),
        }
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `fetch` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts.
    ///
    /// Each attempt is bounded by the fetch timeout; a timeout counts as a
    /// transient failure. Cancelling `cancel` aborts both the attempt and
    /// the backoff sleep with [`SettlementError::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut fetch: F,
    ) -> SettlementResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SettlementResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SettlementError::Cancelled),
                result = tokio::time::timeout(self.timeout, fetch()) => result,
            };

            let err = match result {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!("[settlement] {} succeeded after {} retries", operation, attempt);
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => SettlementError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                },
            };

            if !err.is_retryable() || attempt >= self.max_retries {
                return Err(err);
            }

            let delay = self.config.backoff(attempt);
            attempt += 1;
            FETCH_RETRIES.inc();
            warn!(
                "[settlement] {} failed ({}), retry {}/{} in {:?}",
                operation, err, attempt, self.max_retries, delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SettlementError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
