//! Provider gateway
//!
//! Typed client for the payment provider's API: customer lookup by id and
//! email, and subscription listing. All Stripe API types stay behind this
//! module; the rest of the engine works with the domain types below. The
//! gateway is constructed explicitly and injected so tests can substitute
//! an in-memory fake.

use async_trait::async_trait;
use stripe::{Customer, CustomerId, ListCustomers, ListSubscriptions, Subscription};

use pulsefeed_shared::Plan;

use crate::error::{BillingError, BillingResult};

/// Stripe configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

impl StripeConfig {
    /// Load Stripe configuration from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?;

        Ok(Self {
            secret_key,
            webhook_secret,
        })
    }
}

/// A customer as known by the provider. Read-only; never mutated locally.
#[derive(Debug, Clone)]
pub struct RemoteCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// Result of a customer lookup by id.
///
/// A provider-side deleted customer collapses to `NotFound`: callers treat
/// it as "no customer", not as an error.
#[derive(Debug, Clone)]
pub enum CustomerLookup {
    Found(RemoteCustomer),
    NotFound,
}

/// Provider-side subscription status. Superset of the local enum; only the
/// first three grant entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
}

impl RemoteSubscriptionStatus {
    /// Whether this status means the customer currently has access.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            RemoteSubscriptionStatus::Active
                | RemoteSubscriptionStatus::Trialing
                | RemoteSubscriptionStatus::PastDue
        )
    }

    /// Parse a raw provider status string. The provider may grow new
    /// statuses at any time; anything unrecognized is treated as not live.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "active" => RemoteSubscriptionStatus::Active,
            "trialing" => RemoteSubscriptionStatus::Trialing,
            "past_due" => RemoteSubscriptionStatus::PastDue,
            "canceled" => RemoteSubscriptionStatus::Canceled,
            "incomplete" => RemoteSubscriptionStatus::Incomplete,
            "incomplete_expired" => RemoteSubscriptionStatus::IncompleteExpired,
            "unpaid" => RemoteSubscriptionStatus::Unpaid,
            "paused" => RemoteSubscriptionStatus::Paused,
            _ => RemoteSubscriptionStatus::Canceled,
        }
    }
}

impl From<stripe::SubscriptionStatus> for RemoteSubscriptionStatus {
    fn from(s: stripe::SubscriptionStatus) -> Self {
        match s {
            stripe::SubscriptionStatus::Active => RemoteSubscriptionStatus::Active,
            stripe::SubscriptionStatus::Trialing => RemoteSubscriptionStatus::Trialing,
            stripe::SubscriptionStatus::PastDue => RemoteSubscriptionStatus::PastDue,
            stripe::SubscriptionStatus::Canceled => RemoteSubscriptionStatus::Canceled,
            stripe::SubscriptionStatus::Incomplete => RemoteSubscriptionStatus::Incomplete,
            stripe::SubscriptionStatus::IncompleteExpired => {
                RemoteSubscriptionStatus::IncompleteExpired
            }
            stripe::SubscriptionStatus::Unpaid => RemoteSubscriptionStatus::Unpaid,
            stripe::SubscriptionStatus::Paused => RemoteSubscriptionStatus::Paused,
        }
    }
}

/// One line item on a remote subscription. `plan_tag` is decoded from the
/// price metadata `plan` key when present.
#[derive(Debug, Clone)]
pub struct SubscriptionItem {
    pub price_id: String,
    pub plan_tag: Option<Plan>,
}

/// A subscription as known by the provider. A customer may carry several
/// (historical, canceled, one active); the resolver picks the canonical one.
#[derive(Debug, Clone)]
pub struct RemoteSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: RemoteSubscriptionStatus,
    /// Unix creation timestamp; the recency tie-break key.
    pub created: i64,
    pub items: Vec<SubscriptionItem>,
}

/// Read-only provider API used by webhook processing and the sweep.
///
/// All reads are idempotent; no writes are ever issued against the provider.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn find_customer(&self, customer_id: &str) -> BillingResult<CustomerLookup>;

    async fn find_customer_by_email(&self, email: &str)
        -> BillingResult<Option<RemoteCustomer>>;

    /// All subscriptions for a customer, every status. The resolver filters.
    async fn list_subscriptions(&self, customer_id: &str)
        -> BillingResult<Vec<RemoteSubscription>>;
}

/// Stripe-backed gateway implementation
#[derive(Clone)]
pub struct StripeGateway {
    client: stripe::Client,
}

impl StripeGateway {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: stripe::Client::new(config.secret_key.clone()),
        }
    }

    fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
        customer_id.parse().map_err(|_| {
            BillingError::RecordNotFound(format!("invalid customer id '{}'", customer_id))
        })
    }

    fn convert_customer(customer: &Customer) -> RemoteCustomer {
        RemoteCustomer {
            id: customer.id.to_string(),
            email: customer.email.clone().filter(|e| !e.is_empty()),
        }
    }

    fn convert_subscription(sub: &Subscription) -> RemoteSubscription {
        let items = sub
            .items
            .data
            .iter()
            .map(|item| {
                let price = item.price.as_ref();
                SubscriptionItem {
                    price_id: price.map(|p| p.id.to_string()).unwrap_or_default(),
                    plan_tag: price
                        .and_then(|p| p.metadata.as_ref())
                        .and_then(|m| m.get("plan"))
                        .and_then(|tag| tag.parse().ok()),
                }
            })
            .collect();

        RemoteSubscription {
            id: sub.id.to_string(),
            customer_id: sub.customer.id().to_string(),
            status: sub.status.into(),
            created: sub.created,
            items,
        }
    }

    /// True when the Stripe error is a plain 404 for the requested object.
    fn is_not_found(e: &stripe::StripeError) -> bool {
        matches!(e, stripe::StripeError::Stripe(req) if req.http_status == 404)
    }
}

#[async_trait]
impl ProviderGateway for StripeGateway {
    async fn find_customer(&self, customer_id: &str) -> BillingResult<CustomerLookup> {
        let id = Self::parse_customer_id(customer_id)?;

        match Customer::retrieve(&self.client, &id, &[]).await {
            Ok(customer) => {
                if customer.deleted {
                    // Deleted customers still resolve on the API; treat as gone.
                    tracing::debug!(customer_id = %customer_id, "Customer is deleted on provider");
                    return Ok(CustomerLookup::NotFound);
                }
                Ok(CustomerLookup::Found(Self::convert_customer(&customer)))
            }
            Err(e) if Self::is_not_found(&e) => Ok(CustomerLookup::NotFound),
            Err(e) => Err(BillingError::ProviderUnavailable(e.to_string())),
        }
    }

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> BillingResult<Option<RemoteCustomer>> {
        let mut params = ListCustomers::new();
        params.email = Some(email);
        params.limit = Some(1);

        let customers = Customer::list(&self.client, &params)
            .await
            .map_err(|e| BillingError::ProviderUnavailable(e.to_string()))?;

        Ok(customers
            .data
            .iter()
            .find(|c| !c.deleted)
            .map(Self::convert_customer))
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<RemoteSubscription>> {
        let id = Self::parse_customer_id(customer_id)?;

        let mut params = ListSubscriptions::new();
        params.customer = Some(id);
        params.status = Some(stripe::SubscriptionStatusFilter::All);
        params.limit = Some(100);

        let subs = Subscription::list(&self.client, &params)
            .await
            .map_err(|e| BillingError::ProviderUnavailable(e.to_string()))?;

        Ok(subs.data.iter().map(Self::convert_subscription).collect())
    }
}
