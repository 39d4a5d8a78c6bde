//! PulseFeed Sync Trigger
//!
//! Operator/cron entry point that invokes the billing API's full
//! reconciliation sweep with bounded fixed-delay retries. Exits nonzero
//! when all attempts fail so schedulers surface the failure.

mod client;

use tracing::{info, warn};

use crate::client::{SyncClient, SyncConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting PulseFeed sync trigger");

    let config = SyncConfig::from_env()?;
    info!(
        base_url = %config.base_url,
        retry_attempts = config.retry_attempts,
        retry_delay_ms = config.retry_delay.as_millis() as u64,
        "Sync configuration loaded"
    );

    let client = SyncClient::new(config)?;
    let response = client.trigger_sweep().await?;

    info!(
        total_users = response.summary.total_users,
        updated = response.summary.updated_count,
        already_synced = response.summary.already_synced_count,
        errors = response.summary.error_count,
        "Reconciliation sweep complete"
    );

    if response.summary.error_count > 0 {
        warn!(
            errors = response.summary.error_count,
            "Sweep finished with per-record failures; see API logs"
        );
    }

    Ok(())
}
