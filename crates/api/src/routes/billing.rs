//! Billing reconciliation routes
//!
//! The webhook route consumes the raw body: signature verification runs
//! over the exact bytes Stripe signed, before any JSON parsing.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pulsefeed_billing::{RecordResult, SweepSummary, UserStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileUserRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ReconcileUserResponse {
    pub success: bool,
    pub message: String,
    pub previous_data: pulsefeed_billing::BillingRecord,
    pub new_data: pulsefeed_billing::BillingRecord,
    pub provider_data: pulsefeed_billing::ResolvedState,
}

#[derive(Debug, Serialize)]
pub struct SweepCounts {
    pub total_users: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub updated_count: usize,
    pub already_synced_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ReconcileAllResponse {
    pub success: bool,
    pub summary: SweepCounts,
    pub results: Vec<RecordResult>,
}

impl From<SweepSummary> for ReconcileAllResponse {
    fn from(summary: SweepSummary) -> Self {
        Self {
            success: summary.failed == 0,
            summary: SweepCounts {
                total_users: summary.total,
                success_count: summary.succeeded,
                error_count: summary.failed,
                updated_count: summary.updated,
                already_synced_count: summary.already_synced,
            },
            results: summary.results,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UserStatusRequest {
    pub user_id: Uuid,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /webhooks/billing
///
/// Verifies the signature over the raw body, then processes the event.
/// Ignored events (unknown types, unmatchable records, missing checkout
/// metadata) still return 200 so Stripe does not redeliver them.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing Stripe-Signature header".to_string()))?;

    let payload = std::str::from_utf8(&body)
        .map_err(|_| ApiError::BadRequest("webhook body is not valid UTF-8".to_string()))?;

    let event = state.billing.webhooks.verify_event(payload, signature)?;
    state.billing.webhooks.handle_event(&event).await?;

    Ok(Json(WebhookResponse { received: true }))
}

/// POST /reconcile/user
///
/// Reconcile a single user found by email; 404 when no record matches.
pub async fn reconcile_user(
    State(state): State<AppState>,
    Json(request): Json<ReconcileUserRequest>,
) -> ApiResult<Json<ReconcileUserResponse>> {
    let report = state.billing.sweep.reconcile_user(&request.email).await?;

    let message = if report.updated {
        format!(
            "Record updated to plan '{}', status '{}'",
            report.current.plan, report.current.subscription_status
        )
    } else {
        "Record already in sync".to_string()
    };

    Ok(Json(ReconcileUserResponse {
        success: true,
        message,
        previous_data: report.previous,
        new_data: report.current,
        provider_data: report.provider,
    }))
}

/// POST /reconcile/all
///
/// Run a full sweep. Per-record failures are reported in the results, not
/// as an HTTP error; only a failure to read the record list is a 5xx.
pub async fn reconcile_all(
    State(state): State<AppState>,
) -> ApiResult<Json<ReconcileAllResponse>> {
    let summary = state
        .billing
        .sweep
        .reconcile_all(Some(state.config.sweep_deadline))
        .await?;

    Ok(Json(summary.into()))
}

/// POST /status/user
///
/// Raw record plus the derived drift flag. Monitoring only.
pub async fn user_status(
    State(state): State<AppState>,
    Json(request): Json<UserStatusRequest>,
) -> ApiResult<Json<UserStatus>> {
    let status = state.billing.sweep.status_for_user(request.user_id).await?;
    Ok(Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsefeed_billing::{RecordOutcome, SweepSummary};

    fn summary() -> SweepSummary {
        SweepSummary {
            total: 5,
            succeeded: 4,
            failed: 1,
            updated: 3,
            already_synced: 1,
            deadline_reached: false,
            results: vec![RecordResult {
                user_id: Uuid::new_v4(),
                email: "user@example.com".to_string(),
                outcome: RecordOutcome::Failed,
                message: Some("provider timeout".to_string()),
            }],
        }
    }

    #[test]
    fn test_reconcile_all_response_shape() {
        let response = ReconcileAllResponse::from(summary());

        assert!(!response.success, "a failed record marks the run");
        assert_eq!(response.summary.total_users, 5);
        assert_eq!(response.summary.success_count, 4);
        assert_eq!(response.summary.error_count, 1);
        assert_eq!(response.summary.updated_count, 3);
        assert_eq!(response.summary.already_synced_count, 1);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["summary"]["total_users"], 5);
        assert_eq!(json["results"][0]["outcome"], "failed");
        assert_eq!(json["results"][0]["message"], "provider timeout");
    }
}
