//! In-memory fakes for the gateway and record store traits.
//!
//! Both fakes mirror the production semantics so reconciliation logic can
//! be exercised without Postgres or Stripe.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use pulsefeed_shared::{Plan, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CustomerLookup, ProviderGateway, RemoteCustomer, RemoteSubscription};
use crate::store::{BillingRecord, RecordPatch, RecordStore};

/// In-memory record store backed by a mutexed map.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<Uuid, BillingRecord>>,
}

impl InMemoryRecordStore {
    pub fn insert(&self, record: BillingRecord) {
        self.records.lock().unwrap().insert(record.user_id, record);
    }

    pub fn get(&self, user_id: Uuid) -> Option<BillingRecord> {
        self.records.lock().unwrap().get(&user_id).cloned()
    }

    fn find_by<F: Fn(&BillingRecord) -> bool>(&self, pred: F) -> Option<BillingRecord> {
        let records = self.records.lock().unwrap();
        let mut matches: Vec<_> = records.values().filter(|r| pred(r)).cloned().collect();
        matches.sort_by_key(|r| r.user_id);
        matches.into_iter().next()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_by_user_id(&self, user_id: Uuid) -> BillingResult<Option<BillingRecord>> {
        Ok(self.get(user_id))
    }

    async fn find_by_email(&self, email: &str) -> BillingResult<Option<BillingRecord>> {
        Ok(self.find_by(|r| r.email == email))
    }

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<BillingRecord>> {
        Ok(self.find_by(|r| r.stripe_customer_id.as_deref() == Some(customer_id)))
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<BillingRecord>> {
        Ok(self.find_by(|r| r.stripe_subscription_id.as_deref() == Some(subscription_id)))
    }

    async fn list_all(&self) -> BillingResult<Vec<BillingRecord>> {
        let mut records: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        records.sort_by_key(|r| r.email.clone());
        Ok(records)
    }

    async fn create_free(&self, user_id: Uuid, email: &str) -> BillingResult<BillingRecord> {
        let record = BillingRecord {
            user_id,
            email: email.to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
            plan: Plan::Free,
            subscription_status: SubscriptionStatus::Canceled,
            plan_updated_at: None,
            subscription_updated_at: None,
        };
        self.insert(record.clone());
        Ok(record)
    }

    async fn apply(&self, user_id: Uuid, patch: &RecordPatch) -> BillingResult<BillingRecord> {
        let mut records = self.records.lock().unwrap();
        let record = records.get(&user_id).ok_or_else(|| {
            BillingError::RecordNotFound(format!("no billing record for user {}", user_id))
        })?;
        let updated = record.with_patch(patch);
        records.insert(user_id, updated.clone());
        Ok(updated)
    }
}

/// Scriptable provider gateway fake.
#[derive(Default)]
pub struct FakeGateway {
    customers: HashMap<String, RemoteCustomer>,
    email_index: HashMap<String, String>,
    subscriptions: HashMap<String, Vec<RemoteSubscription>>,
    failing: HashSet<String>,
}

impl FakeGateway {
    /// Register the provider-side customer matching a local record, with
    /// the given subscriptions.
    pub fn add_customer(&mut self, record: &BillingRecord, subs: Vec<RemoteSubscription>) {
        let id = record
            .stripe_customer_id
            .clone()
            .unwrap_or_else(|| format!("cus_for_{}", record.user_id));
        let customer = RemoteCustomer {
            id: id.clone(),
            email: (!record.email.is_empty()).then(|| record.email.clone()),
        };
        if let Some(email) = &customer.email {
            self.email_index.insert(email.clone(), id.clone());
        }
        self.customers.insert(id.clone(), customer);
        self.subscriptions.insert(id, subs);
    }

    /// Make every lookup touching this customer id fail.
    pub fn fail_customer(&mut self, customer_id: &str) {
        self.failing.insert(customer_id.to_string());
    }

    fn check_failing(&self, customer_id: &str) -> BillingResult<()> {
        if self.failing.contains(customer_id) {
            return Err(BillingError::ProviderUnavailable(format!(
                "injected failure for {}",
                customer_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderGateway for FakeGateway {
    async fn find_customer(&self, customer_id: &str) -> BillingResult<CustomerLookup> {
        self.check_failing(customer_id)?;
        Ok(match self.customers.get(customer_id) {
            Some(c) => CustomerLookup::Found(c.clone()),
            None => CustomerLookup::NotFound,
        })
    }

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> BillingResult<Option<RemoteCustomer>> {
        let Some(id) = self.email_index.get(email) else {
            return Ok(None);
        };
        self.check_failing(id)?;
        Ok(self.customers.get(id).cloned())
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<RemoteSubscription>> {
        self.check_failing(customer_id)?;
        Ok(self
            .subscriptions
            .get(customer_id)
            .cloned()
            .unwrap_or_default())
    }
}
