//! Sync invocation client
//!
//! Triggers the billing API's full reconciliation sweep with a bounded
//! number of fixed-delay retries. The sweep is idempotent and infrequent,
//! so fixed delay beats exponential backoff here; after the attempts are
//! exhausted the final error propagates so cron sees a nonzero exit.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sweep endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Client configuration, loaded from the environment
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub retry_attempts: usize,
    /// Fixed sleep between attempts.
    pub retry_delay: Duration,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, SyncError> {
        let base_url = std::env::var("SYNC_BASE_URL")
            .map_err(|_| SyncError::Config("SYNC_BASE_URL not set".to_string()))?;

        let timeout_secs: u64 = std::env::var("SYNC_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let retry_attempts: usize = std::env::var("SYNC_RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let retry_delay_ms: u64 = std::env::var("SYNC_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000);

        if retry_attempts == 0 {
            return Err(SyncError::Config(
                "SYNC_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
            retry_attempts,
            retry_delay: Duration::from_millis(retry_delay_ms),
        })
    }
}

/// Counts block of the sweep response.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepCounts {
    pub total_users: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub updated_count: usize,
    pub already_synced_count: usize,
}

/// Response body of `POST /reconcile/all`.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepResponse {
    pub success: bool,
    pub summary: SweepCounts,
}

/// Bounded-retry caller of the batch reconcile endpoint
pub struct SyncClient {
    http: reqwest::Client,
    config: SyncConfig,
}

impl SyncClient {
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Trigger a full sweep, retrying transport errors and non-2xx
    /// responses on a fixed delay up to the configured attempt count.
    pub async fn trigger_sweep(&self) -> Result<SweepResponse, SyncError> {
        // take(n) adds n retries after the initial attempt.
        let strategy =
            FixedInterval::new(self.config.retry_delay).take(self.config.retry_attempts - 1);

        Retry::spawn(strategy, || self.attempt()).await
    }

    async fn attempt(&self) -> Result<SweepResponse, SyncError> {
        let url = format!("{}/reconcile/all", self.config.base_url);
        tracing::debug!(url = %url, "Invoking reconciliation sweep");

        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Sweep invocation rejected");
            return Err(SyncError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Transport(format!("invalid sweep response: {}", e)))
    }
}
