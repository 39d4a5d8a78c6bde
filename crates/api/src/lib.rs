// API crate clippy configuration
// Test code patterns:
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! PulseFeed Billing API
//!
//! HTTP surface for the billing reconciliation engine: the Stripe webhook
//! endpoint plus operator-facing reconcile and status endpoints.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
