//! Stripe webhook handling
//!
//! Verifies event signatures over the raw payload, then routes by event
//! type: checkout completion is a direct apply (the most authoritative,
//! lowest-latency signal of a new paid plan), subscription lifecycle events
//! update or downgrade the matching record, and unknown event types are
//! accepted and ignored so new provider event types never trigger delivery
//! retry storms. Every handler only sets absolute values, so re-delivering
//! an event leaves the record unchanged after the second application.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

use pulsefeed_shared::{Plan, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};
use crate::store::{find_by_remote_keys, RecordPatch, RecordStore};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload before it is rejected as a replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// A verified webhook event: envelope fields plus the raw object, which
/// each handler deserializes into its own payload type.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionPayload {
    id: String,
    customer: Option<String>,
    subscription: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPayload {
    id: String,
    customer: String,
    status: String,
}

/// What processing a verified event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A record was written (or re-written to the same values on replay).
    Applied { user_id: Uuid },
    /// The event was accepted but changed nothing; the reason is logged.
    Ignored(&'static str),
}

/// Webhook handler for provider events
pub struct WebhookHandler {
    store: Arc<dyn RecordStore>,
    webhook_secret: String,
}

impl WebhookHandler {
    pub fn new(store: Arc<dyn RecordStore>, webhook_secret: String) -> Self {
        Self {
            store,
            webhook_secret,
        }
    }

    /// Verify a Stripe-style signature header and parse the event.
    ///
    /// The header carries `t=<unix>,v1=<hex hmac>`; the signed payload is
    /// `{t}.{raw body}` under HMAC-SHA256 of the webhook secret. The raw
    /// body must not have been re-serialized before this call. No event is
    /// ever processed unverified.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<&str> = None;

        for part in signature.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => v1_signature = Some(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in webhook signature header");
            BillingError::SignatureInvalid
        })?;

        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::warn!("Missing v1 signature in webhook signature header");
            BillingError::SignatureInvalid
        })?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::SignatureInvalid);
        }

        // The secret's "whsec_" prefix is not part of the key material.
        let secret_key = self
            .webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::SignatureInvalid);
        }

        let event: WebhookEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::warn!(parse_error = %e, "Verified webhook payload is not a valid event");
            BillingError::SignatureInvalid
        })?;

        tracing::debug!(
            event_type = %event.event_type,
            event_id = %event.id,
            "Webhook signature verified"
        );

        Ok(event)
    }

    /// Route a verified event to its handler.
    pub async fn handle_event(&self, event: &WebhookEvent) -> BillingResult<WebhookOutcome> {
        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(event).await?,
            "customer.subscription.updated" => self.handle_subscription_updated(event).await?,
            "customer.subscription.deleted" => self.handle_subscription_deleted(event).await?,
            _ => {
                // The provider adds event types at any time; accepting them
                // keeps its delivery retries quiet.
                tracing::info!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    "Ignoring unhandled webhook event type"
                );
                WebhookOutcome::Ignored("unhandled event type")
            }
        };

        if let WebhookOutcome::Ignored(reason) = &outcome {
            tracing::info!(
                event_type = %event.event_type,
                event_id = %event.id,
                reason = %reason,
                "Webhook event ignored"
            );
        }

        Ok(outcome)
    }

    /// `checkout.session.completed`: direct apply of the purchased plan.
    ///
    /// Requires `metadata.user_id` and `metadata.plan` stamped on the
    /// session at checkout creation. Without them the event cannot be
    /// attributed to a user and is dropped; a delivery retry would carry
    /// the same payload, so failing it would gain nothing.
    async fn handle_checkout_completed(
        &self,
        event: &WebhookEvent,
    ) -> BillingResult<WebhookOutcome> {
        let Ok(session) =
            serde_json::from_value::<CheckoutSessionPayload>(event.data.object.clone())
        else {
            tracing::warn!(event_id = %event.id, "Checkout session payload did not deserialize");
            return Ok(WebhookOutcome::Ignored("malformed checkout session"));
        };

        let user_id = session
            .metadata
            .get("user_id")
            .and_then(|id| Uuid::parse_str(id).ok());
        let plan = session
            .metadata
            .get("plan")
            .and_then(|p| Plan::from_str(p).ok());

        let (Some(user_id), Some(plan)) = (user_id, plan) else {
            tracing::warn!(
                event_id = %event.id,
                session_id = %session.id,
                "Checkout session missing user_id/plan metadata"
            );
            return Ok(WebhookOutcome::Ignored("missing checkout metadata"));
        };

        if self.store.find_by_user_id(user_id).await?.is_none() {
            tracing::warn!(
                event_id = %event.id,
                user_id = %user_id,
                "Checkout completed for unknown user"
            );
            return Ok(WebhookOutcome::Ignored("no billing record for user"));
        }

        let patch = RecordPatch {
            plan: Some(plan),
            subscription_status: Some(SubscriptionStatus::Active),
            stripe_customer_id: session.customer,
            stripe_subscription_id: session.subscription,
            email: None,
            changed_at: OffsetDateTime::now_utc(),
        };

        self.store.apply(user_id, &patch).await?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan,
            session_id = %session.id,
            "Checkout completed, plan applied"
        );

        Ok(WebhookOutcome::Applied { user_id })
    }

    /// `customer.subscription.updated`: pass the provider status through to
    /// the matching record.
    async fn handle_subscription_updated(
        &self,
        event: &WebhookEvent,
    ) -> BillingResult<WebhookOutcome> {
        let Some(subscription) = self.extract_subscription(event) else {
            return Ok(WebhookOutcome::Ignored("malformed subscription payload"));
        };

        let record = find_by_remote_keys(
            self.store.as_ref(),
            Some(&subscription.customer),
            Some(&subscription.id),
            None,
        )
        .await?;

        let Some(record) = record else {
            tracing::info!(
                event_id = %event.id,
                customer_id = %subscription.customer,
                subscription_id = %subscription.id,
                "Subscription update for unknown customer, dropping"
            );
            return Ok(WebhookOutcome::Ignored("no matching billing record"));
        };

        let patch = RecordPatch {
            subscription_status: Some(SubscriptionStatus::parse_lossy(&subscription.status)),
            ..RecordPatch::empty(OffsetDateTime::now_utc())
        };

        self.store.apply(record.user_id, &patch).await?;

        tracing::info!(
            user_id = %record.user_id,
            subscription_id = %subscription.id,
            status = %subscription.status,
            "Subscription status updated"
        );

        Ok(WebhookOutcome::Applied {
            user_id: record.user_id,
        })
    }

    /// `customer.subscription.deleted`: downgrade to the free plan.
    async fn handle_subscription_deleted(
        &self,
        event: &WebhookEvent,
    ) -> BillingResult<WebhookOutcome> {
        let Some(subscription) = self.extract_subscription(event) else {
            return Ok(WebhookOutcome::Ignored("malformed subscription payload"));
        };

        let record = find_by_remote_keys(
            self.store.as_ref(),
            Some(&subscription.customer),
            Some(&subscription.id),
            None,
        )
        .await?;

        let Some(record) = record else {
            tracing::info!(
                event_id = %event.id,
                customer_id = %subscription.customer,
                subscription_id = %subscription.id,
                "Subscription deletion for unknown customer, dropping"
            );
            return Ok(WebhookOutcome::Ignored("no matching billing record"));
        };

        let patch = RecordPatch {
            plan: Some(Plan::Free),
            subscription_status: Some(SubscriptionStatus::Canceled),
            ..RecordPatch::empty(OffsetDateTime::now_utc())
        };

        self.store.apply(record.user_id, &patch).await?;

        tracing::info!(
            user_id = %record.user_id,
            subscription_id = %subscription.id,
            "Subscription deleted, downgraded to free plan"
        );

        Ok(WebhookOutcome::Applied {
            user_id: record.user_id,
        })
    }

    fn extract_subscription(&self, event: &WebhookEvent) -> Option<SubscriptionPayload> {
        match serde_json::from_value(event.data.object.clone()) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(
                    event_id = %event.id,
                    parse_error = %e,
                    "Subscription payload did not deserialize"
                );
                None
            }
        }
    }
}
