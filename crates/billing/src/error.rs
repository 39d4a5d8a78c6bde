//! Billing error taxonomy
//!
//! Each variant maps to a distinct recovery policy: signature failures are
//! rejected outright, provider outages are retried only by the sync trigger,
//! missing records and malformed events are logged and dropped, and
//! persistence failures surface to the caller.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Webhook payload failed signature verification. Never processed;
    /// Stripe applies its own delivery retry policy.
    #[error("Webhook signature verification failed")]
    SignatureInvalid,

    /// The payment provider could not be reached or returned a server
    /// error. Transient; retried only at the sync-invocation layer.
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// No local billing record matches any lookup key. Logged and dropped
    /// rather than failing the caller.
    #[error("Billing record not found: {0}")]
    RecordNotFound(String),

    /// An event is missing required metadata and cannot be recovered from
    /// the data it carries.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Writing to the record store failed.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Missing or invalid configuration at startup.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::PersistenceFailure(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::ProviderUnavailable(e.to_string())
    }
}
