// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! PulseFeed Billing Reconciliation
//!
//! Keeps the locally persisted billing record per user consistent with the
//! canonical subscription state held by Stripe.
//!
//! ## Features
//!
//! - **Provider Gateway**: typed, injectable Stripe client for customer and
//!   subscription reads
//! - **Subscription Resolver**: pure derivation of canonical `(plan, status)`
//!   from a customer's subscription list
//! - **Reconciler**: pure drift diff producing minimal record patches
//! - **Webhooks**: signature-verified Stripe event processing
//! - **Sweep**: batch reconciliation over all records with per-record
//!   failure isolation

pub mod error;
pub mod gateway;
pub mod reconciler;
pub mod resolver;
pub mod store;
pub mod sweep;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testing;

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{
    CustomerLookup, ProviderGateway, RemoteCustomer, RemoteSubscription,
    RemoteSubscriptionStatus, StripeConfig, StripeGateway, SubscriptionItem,
};

// Reconciler
pub use reconciler::reconcile;

// Resolver
pub use resolver::{resolve, ResolvedState};

// Store
pub use store::{find_by_remote_keys, BillingRecord, PgRecordStore, RecordPatch, RecordStore};

// Sweep
pub use sweep::{
    RecordOutcome, RecordResult, SweepService, SweepSummary, UserReconcileReport, UserStatus,
};

// Webhooks
pub use webhooks::{WebhookEvent, WebhookHandler, WebhookOutcome};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service combining webhook processing and the sweep
pub struct BillingService {
    pub webhooks: WebhookHandler,
    pub sweep: SweepService,
}

impl BillingService {
    /// Create a billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config, pool))
    }

    /// Create a billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        let gateway: Arc<dyn ProviderGateway> = Arc::new(StripeGateway::new(&config));
        let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool));

        Self {
            webhooks: WebhookHandler::new(store.clone(), config.webhook_secret),
            sweep: SweepService::new(gateway, store),
        }
    }
}
