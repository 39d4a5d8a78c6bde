//! Subscription resolver
//!
//! Pure derivation of the canonical `(plan, status)` pair from a customer's
//! full subscription list. Deterministic and side-effect free so it can be
//! unit-tested with literal subscription lists, no network mocking.

use serde::Serialize;

use pulsefeed_shared::{Plan, SubscriptionStatus};

use crate::gateway::{RemoteSubscription, RemoteSubscriptionStatus};

/// Canonical billing state for a customer at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedState {
    pub plan: Plan,
    pub subscription_status: SubscriptionStatus,
    /// The subscription backing the state; `None` when nothing is live.
    pub subscription_id: Option<String>,
}

impl ResolvedState {
    /// The no-subscription state: free plan, canceled status.
    pub fn free() -> Self {
        Self {
            plan: Plan::Free,
            subscription_status: SubscriptionStatus::Canceled,
            subscription_id: None,
        }
    }
}

/// Derive canonical state from a customer's subscriptions.
///
/// Live candidates are `active`, `trialing` and `past_due`; everything else
/// is ignored. Among candidates the most recently created wins, which
/// matters when plan changes leave overlapping subscriptions behind. The
/// plan comes from the first line item's price metadata tag; a missing tag
/// falls back to the lowest paid tier rather than blocking entitlement.
pub fn resolve(subs: &[RemoteSubscription]) -> ResolvedState {
    let canonical = subs
        .iter()
        .filter(|s| s.status.is_live())
        .max_by_key(|s| s.created);

    let Some(sub) = canonical else {
        return ResolvedState::free();
    };

    let plan = sub
        .items
        .first()
        .and_then(|item| item.plan_tag)
        .unwrap_or_else(Plan::lowest_paid);

    let subscription_status = match sub.status {
        RemoteSubscriptionStatus::Active => SubscriptionStatus::Active,
        RemoteSubscriptionStatus::Trialing => SubscriptionStatus::Trialing,
        RemoteSubscriptionStatus::PastDue => SubscriptionStatus::PastDue,
        // Unreachable given the live filter, but total for safety.
        _ => SubscriptionStatus::Canceled,
    };

    ResolvedState {
        plan,
        subscription_status,
        subscription_id: Some(sub.id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SubscriptionItem;

    fn sub(
        id: &str,
        status: RemoteSubscriptionStatus,
        created: i64,
        plan_tag: Option<Plan>,
    ) -> RemoteSubscription {
        RemoteSubscription {
            id: id.to_string(),
            customer_id: "cus_1".to_string(),
            status,
            created,
            items: vec![SubscriptionItem {
                price_id: "price_1".to_string(),
                plan_tag,
            }],
        }
    }

    #[test]
    fn test_empty_list_resolves_free_canceled() {
        assert_eq!(resolve(&[]), ResolvedState::free());
    }

    #[test]
    fn test_canceled_only_resolves_free_canceled() {
        let subs = vec![
            sub(
                "sub_a",
                RemoteSubscriptionStatus::Canceled,
                100,
                Some(Plan::Pro),
            ),
            sub(
                "sub_b",
                RemoteSubscriptionStatus::IncompleteExpired,
                200,
                Some(Plan::Starter),
            ),
        ];
        assert_eq!(resolve(&subs), ResolvedState::free());
    }

    #[test]
    fn test_latest_created_wins() {
        let subs = vec![
            sub(
                "sub_old",
                RemoteSubscriptionStatus::Active,
                100,
                Some(Plan::Starter),
            ),
            sub(
                "sub_new",
                RemoteSubscriptionStatus::Active,
                200,
                Some(Plan::Pro),
            ),
        ];

        let state = resolve(&subs);
        assert_eq!(state.subscription_id.as_deref(), Some("sub_new"));
        assert_eq!(state.plan, Plan::Pro);
        assert_eq!(state.subscription_status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_canceled_newer_than_live_is_ignored() {
        let subs = vec![
            sub(
                "sub_live",
                RemoteSubscriptionStatus::PastDue,
                100,
                Some(Plan::Starter),
            ),
            sub(
                "sub_dead",
                RemoteSubscriptionStatus::Canceled,
                999,
                Some(Plan::Pro),
            ),
        ];

        let state = resolve(&subs);
        assert_eq!(state.subscription_id.as_deref(), Some("sub_live"));
        assert_eq!(state.subscription_status, SubscriptionStatus::PastDue);
    }

    #[test]
    fn test_missing_plan_tag_defaults_to_lowest_paid() {
        let subs = vec![sub("sub_a", RemoteSubscriptionStatus::Active, 100, None)];

        let state = resolve(&subs);
        assert_eq!(state.plan, Plan::Starter);
        assert_eq!(state.subscription_status, SubscriptionStatus::Active);
    }

    #[test]
    fn test_deterministic_over_repeated_calls() {
        let subs = vec![
            sub(
                "sub_a",
                RemoteSubscriptionStatus::Trialing,
                150,
                Some(Plan::Pro),
            ),
            sub(
                "sub_b",
                RemoteSubscriptionStatus::Active,
                150,
                Some(Plan::Starter),
            ),
            sub("sub_c", RemoteSubscriptionStatus::Canceled, 300, None),
        ];

        let first = resolve(&subs);
        for _ in 0..10 {
            assert_eq!(resolve(&subs), first);
        }
    }
}
