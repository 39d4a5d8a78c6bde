//! Billing record store
//!
//! CRUD access to the per-user billing record, including the fallback
//! lookup keys (customer id, subscription id, email) used when webhook
//! events arrive for users whose identity keys were never fully persisted.
//! Records are mutated only through `RecordPatch`; UI code never writes
//! here directly.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use pulsefeed_shared::{Plan, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};

/// The local billing record, one per application user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingRecord {
    pub user_id: Uuid,
    /// May be empty for some auth providers; used as a fallback lookup key.
    pub email: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub plan: Plan,
    pub subscription_status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub plan_updated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_updated_at: Option<OffsetDateTime>,
}

impl BillingRecord {
    /// A paid plan on a canceled subscription is drifted state that the
    /// next reconciliation pass must correct.
    pub fn needs_fix(&self) -> bool {
        self.plan.is_paid() && self.subscription_status == SubscriptionStatus::Canceled
    }

    /// Apply a patch, returning the resulting record. Shared by the
    /// Postgres store (as the post-UPDATE shape) and the in-memory store so
    /// both stay semantically identical.
    pub fn with_patch(&self, patch: &RecordPatch) -> BillingRecord {
        let mut next = self.clone();
        if let Some(plan) = patch.plan {
            next.plan = plan;
            next.plan_updated_at = Some(patch.changed_at);
        }
        if let Some(status) = patch.subscription_status {
            next.subscription_status = status;
            next.subscription_updated_at = Some(patch.changed_at);
        }
        if let Some(customer_id) = &patch.stripe_customer_id {
            next.stripe_customer_id = Some(customer_id.clone());
        }
        if let Some(subscription_id) = &patch.stripe_subscription_id {
            next.stripe_subscription_id = Some(subscription_id.clone());
        }
        if let Some(email) = &patch.email {
            next.email = email.clone();
        }
        next
    }
}

/// Minimal field-level patch produced by the reconciler or a webhook
/// handler. `None` means "leave unchanged"; patches never clear a field.
#[derive(Debug, Clone)]
pub struct RecordPatch {
    pub plan: Option<Plan>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub email: Option<String>,
    /// Timestamp written to `plan_updated_at` / `subscription_updated_at`
    /// for the fields this patch touches.
    pub changed_at: OffsetDateTime,
}

impl RecordPatch {
    pub fn empty(changed_at: OffsetDateTime) -> Self {
        Self {
            plan: None,
            subscription_status: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            email: None,
            changed_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plan.is_none()
            && self.subscription_status.is_none()
            && self.stripe_customer_id.is_none()
            && self.stripe_subscription_id.is_none()
            && self.email.is_none()
    }
}

/// Record store seam. Postgres in production, in-memory in tests.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_user_id(&self, user_id: Uuid) -> BillingResult<Option<BillingRecord>>;
    async fn find_by_email(&self, email: &str) -> BillingResult<Option<BillingRecord>>;
    async fn find_by_customer_id(&self, customer_id: &str)
        -> BillingResult<Option<BillingRecord>>;
    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<BillingRecord>>;

    /// Every record, for the batch sweep.
    async fn list_all(&self) -> BillingResult<Vec<BillingRecord>>;

    /// Create the free-plan record at account creation.
    async fn create_free(&self, user_id: Uuid, email: &str) -> BillingResult<BillingRecord>;

    /// Apply a patch and return the updated record.
    async fn apply(&self, user_id: Uuid, patch: &RecordPatch) -> BillingResult<BillingRecord>;
}

/// Ordered multi-key identity resolution: customer id, then subscription
/// id, then email. Used by webhook processing so the strategies live in one
/// place instead of per-handler one-off queries.
pub async fn find_by_remote_keys(
    store: &dyn RecordStore,
    customer_id: Option<&str>,
    subscription_id: Option<&str>,
    email: Option<&str>,
) -> BillingResult<Option<BillingRecord>> {
    if let Some(customer_id) = customer_id {
        if let Some(record) = store.find_by_customer_id(customer_id).await? {
            return Ok(Some(record));
        }
    }
    if let Some(subscription_id) = subscription_id {
        if let Some(record) = store.find_by_subscription_id(subscription_id).await? {
            return Ok(Some(record));
        }
    }
    if let Some(email) = email.filter(|e| !e.is_empty()) {
        if let Some(record) = store.find_by_email(email).await? {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Row shape for `billing_records`; enums travel as text.
#[derive(Debug, sqlx::FromRow)]
struct BillingRecordRow {
    user_id: Uuid,
    email: String,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    plan: String,
    subscription_status: String,
    plan_updated_at: Option<OffsetDateTime>,
    subscription_updated_at: Option<OffsetDateTime>,
}

impl BillingRecordRow {
    fn into_record(self) -> BillingResult<BillingRecord> {
        let plan = Plan::from_str(&self.plan).map_err(|e| {
            BillingError::PersistenceFailure(format!("billing record {} has {}", self.user_id, e))
        })?;

        Ok(BillingRecord {
            user_id: self.user_id,
            email: self.email,
            stripe_customer_id: self.stripe_customer_id,
            stripe_subscription_id: self.stripe_subscription_id,
            plan,
            subscription_status: SubscriptionStatus::parse_lossy(&self.subscription_status),
            plan_updated_at: self.plan_updated_at,
            subscription_updated_at: self.subscription_updated_at,
        })
    }
}

const RECORD_COLUMNS: &str = "user_id, email, stripe_customer_id, stripe_subscription_id, \
     plan, subscription_status, plan_updated_at, subscription_updated_at";

/// Postgres-backed record store
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_by(
        &self,
        column: &'static str,
        value: &str,
    ) -> BillingResult<Option<BillingRecord>> {
        let row: Option<BillingRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM billing_records WHERE {} = $1 LIMIT 1",
            RECORD_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BillingRecordRow::into_record).transpose()
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_by_user_id(&self, user_id: Uuid) -> BillingResult<Option<BillingRecord>> {
        let row: Option<BillingRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM billing_records WHERE user_id = $1",
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BillingRecordRow::into_record).transpose()
    }

    async fn find_by_email(&self, email: &str) -> BillingResult<Option<BillingRecord>> {
        self.fetch_one_by("email", email).await
    }

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<BillingRecord>> {
        self.fetch_one_by("stripe_customer_id", customer_id).await
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<BillingRecord>> {
        self.fetch_one_by("stripe_subscription_id", subscription_id)
            .await
    }

    async fn list_all(&self) -> BillingResult<Vec<BillingRecord>> {
        let rows: Vec<BillingRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM billing_records ORDER BY created_at",
            RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(BillingRecordRow::into_record)
            .collect()
    }

    async fn create_free(&self, user_id: Uuid, email: &str) -> BillingResult<BillingRecord> {
        let row: BillingRecordRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO billing_records (user_id, email, plan, subscription_status)
            VALUES ($1, $2, 'free', 'canceled')
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        row.into_record()
    }

    async fn apply(&self, user_id: Uuid, patch: &RecordPatch) -> BillingResult<BillingRecord> {
        let row: Option<BillingRecordRow> = sqlx::query_as(&format!(
            r#"
            UPDATE billing_records SET
                plan = COALESCE($2, plan),
                subscription_status = COALESCE($3, subscription_status),
                stripe_customer_id = COALESCE($4, stripe_customer_id),
                stripe_subscription_id = COALESCE($5, stripe_subscription_id),
                email = COALESCE($6, email),
                plan_updated_at = CASE WHEN $2 IS NOT NULL THEN $7 ELSE plan_updated_at END,
                subscription_updated_at =
                    CASE WHEN $3 IS NOT NULL THEN $7 ELSE subscription_updated_at END
            WHERE user_id = $1
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(user_id)
        .bind(patch.plan.map(|p| p.as_str()))
        .bind(patch.subscription_status.map(|s| s.as_str()))
        .bind(patch.stripe_customer_id.as_deref())
        .bind(patch.stripe_subscription_id.as_deref())
        .bind(patch.email.as_deref())
        .bind(patch.changed_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_record(),
            None => Err(BillingError::RecordNotFound(format!(
                "no billing record for user {}",
                user_id
            ))),
        }
    }
}
