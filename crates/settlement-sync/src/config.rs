//! # Settlement Configuration
//!
//! Configuration for the settlement engine and its sync loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::SUPPORTED_HEADER_VERSION;

/// Settlement engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Header version accepted by `set_genesis` / `commit_val_set_header`.
    pub supported_header_version: u8,

    /// Interval between sync ticks in milliseconds.
    pub poll_interval_ms: u64,

    /// Timeout applied to each chain fetch in milliseconds.
    pub fetch_timeout_ms: u64,

    /// Retries after the first failed fetch (transient errors only).
    pub max_retries: u32,

    /// First retry delay in milliseconds; doubles per attempt.
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay in milliseconds.
    pub max_backoff_ms: u64,

    /// Capacity of the event queue between poller and sync task.
    pub event_channel_capacity: usize,

    /// Headers committed per tick before yielding.
    pub max_epochs_per_tick: usize,

    /// Keep vaults (and validators) whose voting power is zero.
    pub include_zero_power: bool,

    /// Check header total power and validators root against the locally
    /// derived validator set.
    pub verify_validator_set: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            supported_header_version: SUPPORTED_HEADER_VERSION,
            poll_interval_ms: 12_000,
            fetch_timeout_ms: 10_000,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            event_channel_capacity: 1_024,
            max_epochs_per_tick: 16,
            include_zero_power: false,
            verify_validator_set: true,
        }
    }
}

impl SettlementConfig {
    /// Create a config for testing (short timeouts, small queues).
    pub fn for_testing() -> Self {
        Self {
            poll_interval_ms: 50,
            fetch_timeout_ms: 200,
            max_retries: 2,
            initial_backoff_ms: 10,
            max_backoff_ms: 40,
            event_channel_capacity: 16,
            max_epochs_per_tick: 4,
            ..Self::default()
        }
    }

    /// Poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}
