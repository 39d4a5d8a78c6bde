//! Reconciler
//!
//! Pure comparison of a local billing record against resolved remote state.
//! Produces either `None` (already in sync) or a minimal patch touching
//! only the fields that drifted. All writes flow through the patches
//! produced here and by the webhook handlers; nothing else mutates records.

use time::OffsetDateTime;

use crate::gateway::RemoteCustomer;
use crate::resolver::ResolvedState;
use crate::store::{BillingRecord, RecordPatch};

/// Compare local and remote state, returning the patch that removes the
/// drift, or `None` when every tracked field already matches.
///
/// Email is a one-way backfill: it is patched only when the local value is
/// empty and the remote customer carries one. A user-entered email is never
/// clobbered with provider data. Patches never clear fields; when the
/// remote state has no canonical subscription the plan and status downgrade
/// but historical ids stay in place. Concurrent writers (a webhook racing a
/// sweep) resolve by last-write-wins on the update timestamps.
pub fn reconcile(
    local: &BillingRecord,
    remote: &ResolvedState,
    remote_customer: Option<&RemoteCustomer>,
    now: OffsetDateTime,
) -> Option<RecordPatch> {
    let mut patch = RecordPatch::empty(now);

    if local.plan != remote.plan {
        patch.plan = Some(remote.plan);
    }

    if local.subscription_status != remote.subscription_status {
        patch.subscription_status = Some(remote.subscription_status);
    }

    if let Some(customer) = remote_customer {
        if local.stripe_customer_id.as_deref() != Some(customer.id.as_str()) {
            patch.stripe_customer_id = Some(customer.id.clone());
        }

        if local.email.is_empty() {
            if let Some(email) = customer.email.as_ref().filter(|e| !e.is_empty()) {
                patch.email = Some(email.clone());
            }
        }
    }

    if let Some(subscription_id) = &remote.subscription_id {
        if local.stripe_subscription_id.as_deref() != Some(subscription_id.as_str()) {
            patch.stripe_subscription_id = Some(subscription_id.clone());
        }
    }

    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsefeed_shared::{Plan, SubscriptionStatus};
    use uuid::Uuid;

    fn local(plan: Plan, status: SubscriptionStatus) -> BillingRecord {
        BillingRecord {
            user_id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            stripe_customer_id: Some("cus_1".to_string()),
            stripe_subscription_id: Some("sub_1".to_string()),
            plan,
            subscription_status: status,
            plan_updated_at: None,
            subscription_updated_at: None,
        }
    }

    fn remote(plan: Plan, status: SubscriptionStatus, sub_id: &str) -> ResolvedState {
        ResolvedState {
            plan,
            subscription_status: status,
            subscription_id: Some(sub_id.to_string()),
        }
    }

    fn customer(id: &str, email: Option<&str>) -> RemoteCustomer {
        RemoteCustomer {
            id: id.to_string(),
            email: email.map(|e| e.to_string()),
        }
    }

    #[test]
    fn test_matching_state_is_noop() {
        let record = local(Plan::Starter, SubscriptionStatus::Active);
        let state = remote(Plan::Starter, SubscriptionStatus::Active, "sub_1");
        let cus = customer("cus_1", Some("user@example.com"));

        assert!(reconcile(&record, &state, Some(&cus), OffsetDateTime::now_utc()).is_none());
    }

    #[test]
    fn test_drifted_status_produces_minimal_patch() {
        let record = local(Plan::Starter, SubscriptionStatus::Canceled);
        assert!(record.needs_fix());

        let state = remote(Plan::Starter, SubscriptionStatus::Active, "sub_1");
        let cus = customer("cus_1", None);
        let now = OffsetDateTime::now_utc();

        let patch = reconcile(&record, &state, Some(&cus), now).unwrap();
        assert_eq!(patch.subscription_status, Some(SubscriptionStatus::Active));
        assert!(patch.plan.is_none(), "plan matches, must not be patched");
        assert!(patch.stripe_customer_id.is_none());
        assert!(patch.email.is_none());
    }

    #[test]
    fn test_reconcile_converges() {
        let record = local(Plan::Starter, SubscriptionStatus::Canceled);
        let state = remote(Plan::Starter, SubscriptionStatus::Active, "sub_1");
        let now = OffsetDateTime::now_utc();

        let patch = reconcile(&record, &state, None, now).unwrap();
        let fixed = record.with_patch(&patch);

        assert!(!fixed.needs_fix());
        assert!(
            reconcile(&fixed, &state, None, now).is_none(),
            "second pass over the patched record must be a no-op"
        );
    }

    #[test]
    fn test_email_backfill_into_empty_local() {
        let mut record = local(Plan::Free, SubscriptionStatus::Canceled);
        record.email = String::new();

        let state = ResolvedState::free();
        let cus = customer("cus_1", Some("a@b.com"));

        let patch = reconcile(&record, &state, Some(&cus), OffsetDateTime::now_utc()).unwrap();
        assert_eq!(patch.email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_email_never_overwritten() {
        let record = local(Plan::Free, SubscriptionStatus::Canceled);
        assert_eq!(record.email, "user@example.com");

        let state = ResolvedState::free();
        let cus = customer("cus_1", Some("a@b.com"));

        let patch = reconcile(&record, &state, Some(&cus), OffsetDateTime::now_utc());
        if let Some(patch) = patch {
            assert!(patch.email.is_none(), "non-empty local email must stay");
        }
    }

    #[test]
    fn test_vanished_subscription_downgrades_without_clearing_ids() {
        let record = local(Plan::Pro, SubscriptionStatus::Active);
        let state = ResolvedState::free();

        let patch = reconcile(&record, &state, None, OffsetDateTime::now_utc()).unwrap();
        assert_eq!(patch.plan, Some(Plan::Free));
        assert_eq!(patch.subscription_status, Some(SubscriptionStatus::Canceled));
        assert!(patch.stripe_subscription_id.is_none());

        let next = record.with_patch(&patch);
        assert_eq!(
            next.stripe_subscription_id.as_deref(),
            Some("sub_1"),
            "historical subscription id is kept for audit"
        );
    }

    #[test]
    fn test_customer_id_adopted_when_found_by_email() {
        let mut record = local(Plan::Free, SubscriptionStatus::Canceled);
        record.stripe_customer_id = None;
        record.stripe_subscription_id = None;

        let state = remote(Plan::Pro, SubscriptionStatus::Trialing, "sub_9");
        let cus = customer("cus_9", Some("other@example.com"));

        let patch = reconcile(&record, &state, Some(&cus), OffsetDateTime::now_utc()).unwrap();
        assert_eq!(patch.stripe_customer_id.as_deref(), Some("cus_9"));
        assert_eq!(patch.stripe_subscription_id.as_deref(), Some("sub_9"));
        assert_eq!(patch.plan, Some(Plan::Pro));
        assert!(patch.email.is_none(), "local email non-empty, no backfill");
    }
}
