//! # Settlement Telemetry
//!
//! Observability for the settlement sync engine.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with env filter, plain or JSON output
//! - **Metrics**: Prometheus counters/gauges for commits, quorum checks and the sync loop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use settlement_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SETTLEMENT_LOG_LEVEL` | `info` | Log level filter |
//! | `SETTLEMENT_JSON_LOGS` | `false` | JSON log lines |
//! | `SETTLEMENT_SERVICE_NAME` | `settlement-sync` | Service name on log lines |
//! | `SETTLEMENT_CONSOLE_OUTPUT` | `true` | Console output |

#![warn(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging, init_test_logging, LoggingHandle};
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, COMMITS_REJECTED,
    EVENTS_APPLIED, FETCH_RETRIES, HEADERS_COMMITTED, LAST_COMMITTED_EPOCH, QUORUM_DURATION,
    QUORUM_VERIFICATIONS, REORGS_DETECTED, SIGNERS_EXCLUDED, SYNC_STATE,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Subscriber could not be installed
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// Metric registration or encoding failed
    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    let logging = init_logging(&config)?;

    Ok(TelemetryGuard {
        _logging: logging,
        metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingHandle,
    metrics: MetricsHandle,
}

impl TelemetryGuard {
    /// Registered metrics.
    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
