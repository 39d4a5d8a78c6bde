//! Plan and subscription-status enums
//!
//! Both enums are stored as lowercase text in `billing_records` and travel
//! as the same strings in API payloads and Stripe price metadata.

use serde::{Deserialize, Serialize};

/// Subscription plan for a PulseFeed account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Starter,
    Pro,
}

/// Error returned when a plan string is not recognized
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown plan '{0}'")]
pub struct PlanParseError(pub String);

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
        }
    }

    /// Lowest paid tier, used as the fallback when a subscription carries
    /// no plan tag in its price metadata.
    pub fn lowest_paid() -> Self {
        Plan::Starter
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Plan::Free)
    }
}

impl std::str::FromStr for Plan {
    type Err = PlanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            other => Err(PlanParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Local subscription status for a billing record
///
/// A record with no subscription at all is stored as `canceled` alongside
/// `plan = free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// Parse a status string from the database or a webhook payload.
    /// Anything outside the local enum collapses to `canceled`, which keeps
    /// the record on the safe (no-entitlement) side.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            _ => SubscriptionStatus::Canceled,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_plan_round_trip() {
        for plan in [Plan::Free, Plan::Starter, Plan::Pro] {
            assert_eq!(Plan::from_str(plan.as_str()).unwrap(), plan);
        }
    }

    #[test]
    fn test_unknown_plan_rejected() {
        assert!(Plan::from_str("enterprise").is_err());
    }

    #[test]
    fn test_lowest_paid_is_starter() {
        assert_eq!(Plan::lowest_paid(), Plan::Starter);
        assert!(Plan::lowest_paid().is_paid());
    }

    #[test]
    fn test_status_parse_lossy_collapses_unknown() {
        assert_eq!(
            SubscriptionStatus::parse_lossy("incomplete_expired"),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            SubscriptionStatus::parse_lossy("past_due"),
            SubscriptionStatus::PastDue
        );
    }
}
