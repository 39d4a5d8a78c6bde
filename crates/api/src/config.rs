//! Server configuration

use std::time::Duration;

/// API server configuration, loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Upper bound on a full reconciliation sweep; past it the sweep
    /// returns a partial summary.
    pub sweep_deadline: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let sweep_deadline_secs = std::env::var("SWEEP_DEADLINE_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        Ok(Self {
            database_url,
            bind_address,
            sweep_deadline: Duration::from_secs(sweep_deadline_secs),
        })
    }
}
