//! The payment entity and its pure attempt-decision logic.
//!
//! The gateway call itself is the one genuinely impure step in this
//! service; everything around it — what the next status should be, whether
//! to retry, what event to emit — is decided here from the gateway's
//! outcome, never by reaching back into the gateway or the database.

use crate::gateway::GatewayOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// A gateway call is in flight (or about to be made) for this attempt.
    Pending,
    /// The gateway accepted the charge; terminal.
    Success,
    /// The gateway declined and no further attempt is scheduled; terminal for this row.
    Failed,
}

impl PaymentStatus {
    /// Parse from the `TEXT` database representation.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not one of the three recognized values.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("invalid payment status: {other}")),
        }
    }

    /// Render as the `TEXT` database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

/// The payment row, as persisted in `payments`. One row per booking; each
/// retried attempt updates `attempt_count` and the status fields on the
/// same row rather than inserting a new one (at most one non-`FAILED`
/// payment exists per booking at any time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Stable identifier.
    pub id: Uuid,
    /// The booking this payment is for.
    pub booking_id: Uuid,
    /// Fixed-point currency amount, smallest unit.
    pub amount: i64,
    /// Current lifecycle status.
    pub status: PaymentStatus,
    /// Payment method used for the charge.
    pub method: String,
    /// Gateway transaction id, set only on `Success`.
    pub transaction_id: Option<String>,
    /// Reason recorded by the most recent declined attempt, if any.
    pub failure_reason: Option<String>,
    /// Number of gateway attempts made so far, including the current one.
    pub attempt_count: u32,
    /// When the first attempt for this booking was created.
    pub created_at: DateTime<Utc>,
    /// When this row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Construct the first attempt for a booking.
    #[must_use]
    pub fn first_attempt(booking_id: Uuid, amount: i64, method: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            amount,
            status: PaymentStatus::Pending,
            method,
            transaction_id: None,
            failure_reason: None,
            attempt_count: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What to do after a gateway call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptDecision {
    /// The gateway accepted the charge.
    Succeeded {
        /// Gateway-assigned transaction id.
        transaction_id: String,
    },
    /// The gateway declined but attempts remain; schedule a `RetryPayment`.
    RetryLater {
        /// When the next attempt should run.
        retry_at: DateTime<Utc>,
        /// Reason from this attempt, recorded on the row and the informational `PaymentFailed`.
        reason: String,
    },
    /// The gateway declined and `attempt_count` has reached `max_attempts`.
    ExhaustedRetries {
        /// Reason from the final attempt.
        reason: String,
    },
}

/// Decide the next step after `outcome`, given the attempt count that
/// produced it.
#[must_use]
pub fn decide_after_attempt(
    outcome: &GatewayOutcome,
    attempt_count: u32,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> AttemptDecision {
    match outcome {
        GatewayOutcome::Success { transaction_id } => {
            AttemptDecision::Succeeded { transaction_id: transaction_id.clone() }
        }
        GatewayOutcome::Declined { reason } => {
            if attempt_count >= max_attempts {
                AttemptDecision::ExhaustedRetries { reason: reason.clone() }
            } else {
                AttemptDecision::RetryLater { retry_at: now + retry_backoff(attempt_count), reason: reason.clone() }
            }
        }
    }
}

/// Exponential backoff before the next attempt, seeded by `attempt_count`.
#[must_use]
pub fn retry_backoff(attempt_count: u32) -> chrono::Duration {
    let exponent = attempt_count.min(10);
    let secs = 5_i64.saturating_mul(1_i64 << exponent.min(8));
    chrono::Duration::seconds(secs.min(300))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_always_decides_succeeded() {
        let outcome = GatewayOutcome::Success { transaction_id: "tx-1".to_string() };
        let decision = decide_after_attempt(&outcome, 1, 3, Utc::now());
        assert_eq!(decision, AttemptDecision::Succeeded { transaction_id: "tx-1".to_string() });
    }

    #[test]
    fn decline_below_max_attempts_schedules_retry() {
        let outcome = GatewayOutcome::Declined { reason: "declined".to_string() };
        let decision = decide_after_attempt(&outcome, 1, 3, Utc::now());
        assert!(matches!(decision, AttemptDecision::RetryLater { .. }));
    }

    #[test]
    fn decline_at_max_attempts_exhausts_retries() {
        let outcome = GatewayOutcome::Declined { reason: "declined".to_string() };
        let decision = decide_after_attempt(&outcome, 3, 3, Utc::now());
        assert_eq!(decision, AttemptDecision::ExhaustedRetries { reason: "declined".to_string() });
    }

    #[test]
    fn decline_past_max_attempts_exhausts_retries() {
        let outcome = GatewayOutcome::Declined { reason: "declined".to_string() };
        let decision = decide_after_attempt(&outcome, 4, 3, Utc::now());
        assert_eq!(decision, AttemptDecision::ExhaustedRetries { reason: "declined".to_string() });
    }

    #[test]
    fn backoff_grows_with_attempt_count_and_is_capped() {
        assert!(retry_backoff(1) < retry_backoff(2));
        assert_eq!(retry_backoff(10), chrono::Duration::seconds(300));
    }
}
