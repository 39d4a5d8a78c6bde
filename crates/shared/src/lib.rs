#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! PulseFeed Shared Types
//!
//! Cross-crate types for the billing reconciliation engine:
//! plan and subscription-status enums plus database pool helpers.

pub mod db;
pub mod types;

pub use db::create_pool;
pub use types::{Plan, PlanParseError, SubscriptionStatus};
