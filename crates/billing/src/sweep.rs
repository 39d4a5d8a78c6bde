//! Reconciliation sweep
//!
//! Batch orchestration over every local billing record: look the user up on
//! the provider, resolve canonical state, reconcile, persist. One record's
//! failure (provider timeout, malformed data) is caught and counted, never
//! aborting the rest of the pass. Also hosts the single-user reconcile used
//! by support tooling and the read-only status check used for monitoring.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CustomerLookup, ProviderGateway, RemoteCustomer};
use crate::reconciler::reconcile;
use crate::resolver::{resolve, ResolvedState};
use crate::store::{BillingRecord, RecordStore};

/// Per-record outcome of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Drift was found and a patch was persisted.
    Updated,
    /// Local state already matched the provider.
    AlreadySynced,
    /// This record's pass failed; the error is in `message`.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordResult {
    pub user_id: Uuid,
    pub email: String,
    pub outcome: RecordOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregate result of one sweep.
///
/// Counts hold `succeeded + failed == total` and
/// `updated + already_synced == succeeded` over the records attempted.
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub updated: usize,
    pub already_synced: usize,
    /// True when the sweep stopped early on its deadline; the counts then
    /// cover only the records attempted.
    pub deadline_reached: bool,
    pub results: Vec<RecordResult>,
}

impl SweepSummary {
    fn new() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            updated: 0,
            already_synced: 0,
            deadline_reached: false,
            results: Vec::new(),
        }
    }

    fn push(&mut self, result: RecordResult) {
        self.total += 1;
        match result.outcome {
            RecordOutcome::Updated => {
                self.succeeded += 1;
                self.updated += 1;
            }
            RecordOutcome::AlreadySynced => {
                self.succeeded += 1;
                self.already_synced += 1;
            }
            RecordOutcome::Failed => self.failed += 1,
        }
        self.results.push(result);
    }

    /// No failures and no deadline cutoff.
    pub fn healthy(&self) -> bool {
        self.failed == 0 && !self.deadline_reached
    }
}

/// Result of a single-user reconcile, with before/after state for the
/// operator who triggered it.
#[derive(Debug, Clone, Serialize)]
pub struct UserReconcileReport {
    pub previous: BillingRecord,
    pub current: BillingRecord,
    pub provider: ResolvedState,
    pub updated: bool,
}

/// Read-only record view for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct UserStatus {
    #[serde(flatten)]
    pub record: BillingRecord,
    pub needs_fix: bool,
}

/// Sweep service: batch and single-user reconciliation.
pub struct SweepService {
    gateway: Arc<dyn ProviderGateway>,
    store: Arc<dyn RecordStore>,
}

impl SweepService {
    pub fn new(gateway: Arc<dyn ProviderGateway>, store: Arc<dyn RecordStore>) -> Self {
        Self { gateway, store }
    }

    /// Reconcile every local record against the provider.
    ///
    /// Records are processed sequentially; per-record failures are isolated.
    /// With a deadline set, the sweep stops between records once it is
    /// exceeded and returns the partial summary instead of failing.
    pub async fn reconcile_all(&self, deadline: Option<Duration>) -> BillingResult<SweepSummary> {
        let started = Instant::now();
        let records = self.store.list_all().await?;
        let record_count = records.len();

        tracing::info!(records = record_count, "Starting reconciliation sweep");

        let mut summary = SweepSummary::new();

        for record in records {
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    summary.deadline_reached = true;
                    tracing::warn!(
                        attempted = summary.total,
                        remaining = record_count - summary.total,
                        "Sweep deadline reached, returning partial summary"
                    );
                    break;
                }
            }

            let user_id = record.user_id;
            let email = record.email.clone();

            match self.reconcile_record(&record).await {
                Ok(Some(updated)) => {
                    tracing::info!(
                        user_id = %user_id,
                        plan = %updated.plan,
                        status = %updated.subscription_status,
                        "Record reconciled"
                    );
                    summary.push(RecordResult {
                        user_id,
                        email,
                        outcome: RecordOutcome::Updated,
                        message: None,
                    });
                }
                Ok(None) => {
                    summary.push(RecordResult {
                        user_id,
                        email,
                        outcome: RecordOutcome::AlreadySynced,
                        message: None,
                    });
                }
                Err(e) => {
                    tracing::error!(user_id = %user_id, error = %e, "Record reconcile failed");
                    summary.push(RecordResult {
                        user_id,
                        email,
                        outcome: RecordOutcome::Failed,
                        message: Some(e.to_string()),
                    });
                }
            }
        }

        tracing::info!(
            total = summary.total,
            updated = summary.updated,
            already_synced = summary.already_synced,
            failed = summary.failed,
            deadline_reached = summary.deadline_reached,
            "Reconciliation sweep complete"
        );

        Ok(summary)
    }

    /// Reconcile one record; `Ok(Some)` is the updated record, `Ok(None)`
    /// means it was already in sync.
    async fn reconcile_record(
        &self,
        record: &BillingRecord,
    ) -> BillingResult<Option<BillingRecord>> {
        let (state, customer) = self.resolve_remote(record).await?;

        let Some(patch) = reconcile(record, &state, customer.as_ref(), OffsetDateTime::now_utc())
        else {
            return Ok(None);
        };

        let updated = self.store.apply(record.user_id, &patch).await?;
        Ok(Some(updated))
    }

    /// Two-step provider lookup: by stored customer id, then by email. A
    /// user with no provider presence at all resolves to the free state,
    /// which downgrades drifted records.
    async fn resolve_remote(
        &self,
        record: &BillingRecord,
    ) -> BillingResult<(ResolvedState, Option<RemoteCustomer>)> {
        let mut customer = None;

        if let Some(customer_id) = &record.stripe_customer_id {
            customer = match self.gateway.find_customer(customer_id).await? {
                CustomerLookup::Found(c) => Some(c),
                CustomerLookup::NotFound => None,
            };
        }

        if customer.is_none() && !record.email.is_empty() {
            customer = self.gateway.find_customer_by_email(&record.email).await?;
        }

        let Some(customer) = customer else {
            return Ok((ResolvedState::free(), None));
        };

        let subs = self.gateway.list_subscriptions(&customer.id).await?;
        Ok((resolve(&subs), Some(customer)))
    }

    /// Reconcile a single user looked up by email. Used by support tooling;
    /// returns the before/after records and what the provider resolved to.
    pub async fn reconcile_user(&self, email: &str) -> BillingResult<UserReconcileReport> {
        let record = self
            .store
            .find_by_email(email)
            .await?
            .ok_or_else(|| BillingError::RecordNotFound(format!("no record for '{}'", email)))?;

        let (state, customer) = self.resolve_remote(&record).await?;

        match reconcile(&record, &state, customer.as_ref(), OffsetDateTime::now_utc()) {
            Some(patch) => {
                let current = self.store.apply(record.user_id, &patch).await?;
                tracing::info!(
                    user_id = %record.user_id,
                    plan = %current.plan,
                    status = %current.subscription_status,
                    "Single-user reconcile applied"
                );
                Ok(UserReconcileReport {
                    previous: record,
                    current,
                    provider: state,
                    updated: true,
                })
            }
            None => Ok(UserReconcileReport {
                current: record.clone(),
                previous: record,
                provider: state,
                updated: false,
            }),
        }
    }

    /// Raw record plus the derived drift flag. Monitoring only, no writes.
    pub async fn status_for_user(&self, user_id: Uuid) -> BillingResult<UserStatus> {
        let record = self
            .store
            .find_by_user_id(user_id)
            .await?
            .ok_or_else(|| BillingError::RecordNotFound(format!("no record for {}", user_id)))?;

        let needs_fix = record.needs_fix();
        Ok(UserStatus { record, needs_fix })
    }
}
