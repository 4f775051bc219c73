//! The booking entity and its pure transition logic.
//!
//! The decision functions here never touch I/O: given the row currently on
//! file and an incoming command or event, they decide the next status and
//! which event (if any) belongs in the outbox. [`crate::repository`] is the
//! imperative shell that loads the row under a transaction, calls into this
//! module, and persists the result alongside the outbox row atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(pub Uuid);

impl BookingId {
    /// Allocate a new, random booking id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a booking. Once terminal (`Confirmed`/`Cancelled`),
/// no further transition is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Created, awaiting inventory reservation and payment.
    Pending,
    /// Payment succeeded; terminal.
    Confirmed,
    /// Inventory could not be reserved, or payment exhausted retries; terminal.
    Cancelled,
}

impl BookingStatus {
    /// Parse a status from its `TEXT` database representation.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not one of the three recognized values.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("invalid booking status: {other}")),
        }
    }

    /// Render as its `TEXT` database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// The booking row, as persisted in `bookings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    /// Stable identifier.
    pub id: BookingId,
    /// The user who placed the booking.
    pub user_id: String,
    /// Opaque room/resource identifier.
    pub item_ref: String,
    /// Fixed-point currency amount, smallest unit (e.g. cents).
    pub amount: i64,
    /// Current lifecycle status.
    pub status: BookingStatus,
    /// Human-readable reason, set only when `status == Cancelled`.
    pub cancellation_reason: Option<String>,
    /// When this booking was created.
    pub created_at: DateTime<Utc>,
    /// When this booking was confirmed, if it was.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When this booking was cancelled, if it was.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token.
    pub version: i64,
}

impl Booking {
    /// Construct a freshly created, `Pending` booking.
    #[must_use]
    pub fn new(user_id: String, item_ref: String, amount: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: BookingId::new(),
            user_id,
            item_ref,
            amount,
            status: BookingStatus::Pending,
            cancellation_reason: None,
            created_at: now,
            confirmed_at: None,
            cancelled_at: None,
            version: 0,
        }
    }
}

/// What to do in response to a reconciliation event that arrives after the
/// booking already reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Log a warning and emit a `refund_requested` outbox row; no downstream
    /// refund processing is implemented by this service.
    RefundRequested,
    /// Nothing to do; this is a harmless duplicate of an already-applied transition.
    Duplicate,
}

/// The outcome of applying an event to a booking: either a state transition
/// the caller must persist (plus the outbox event to emit), or no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Transition the booking to `Cancelled` with the given reason and emit `BookingCancelled`.
    Cancel { reason: String },
    /// Transition the booking to `Confirmed` and emit nothing (no outbound event for confirmation).
    Confirm,
    /// The booking is already terminal; a late event needs reconciliation handling, not a transition.
    Reconcile(Reconciliation),
    /// No state change and no event: a harmless duplicate or an event this booking doesn't react to yet.
    Ignore,
}

/// React to `InventoryReservationFailed{reason}`.
///
/// Per the data model invariant, a booking leaves `Pending` at most once;
/// redelivery of this event against an already-terminal booking is a no-op.
#[must_use]
pub fn on_inventory_reservation_failed(booking: &Booking, reason: &str) -> Decision {
    match booking.status {
        BookingStatus::Pending => Decision::Cancel {
            reason: format!("inventory: {reason}"),
        },
        BookingStatus::Cancelled | BookingStatus::Confirmed => Decision::Ignore,
    }
}

/// React to `PaymentSucceeded`.
#[must_use]
pub fn on_payment_succeeded(booking: &Booking) -> Decision {
    match booking.status {
        BookingStatus::Pending => Decision::Confirm,
        BookingStatus::Confirmed => Decision::Ignore,
        BookingStatus::Cancelled => Decision::Reconcile(Reconciliation::RefundRequested),
    }
}

/// React to `PaymentFailed{attempt_count, final}`.
///
/// Only a final failure (or one that has reached `max_attempts`) cancels the
/// booking; a non-final failure means the payment service will retry, so this
/// service takes no action and simply acks.
#[must_use]
pub fn on_payment_failed(
    booking: &Booking,
    reason: &str,
    attempt_count: u32,
    is_final: bool,
    max_attempts: u32,
) -> Decision {
    if !matches!(booking.status, BookingStatus::Pending) {
        return Decision::Ignore;
    }
    if is_final || attempt_count >= max_attempts {
        Decision::Cancel {
            reason: reason.to_string(),
        }
    } else {
        Decision::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_booking() -> Booking {
        Booking::new("user-1".to_string(), "room-42".to_string(), 10_000, Utc::now())
    }

    #[test]
    fn inventory_failure_cancels_pending_booking() {
        let booking = pending_booking();
        let decision = on_inventory_reservation_failed(&booking, "insufficient");
        assert_eq!(
            decision,
            Decision::Cancel { reason: "inventory: insufficient".to_string() }
        );
    }

    #[test]
    fn inventory_failure_on_cancelled_booking_is_ignored() {
        let mut booking = pending_booking();
        booking.status = BookingStatus::Cancelled;
        assert_eq!(on_inventory_reservation_failed(&booking, "insufficient"), Decision::Ignore);
    }

    #[test]
    fn payment_success_confirms_pending_booking() {
        let booking = pending_booking();
        assert_eq!(on_payment_succeeded(&booking), Decision::Confirm);
    }

    #[test]
    fn payment_success_on_confirmed_booking_is_idempotent() {
        let mut booking = pending_booking();
        booking.status = BookingStatus::Confirmed;
        assert_eq!(on_payment_succeeded(&booking), Decision::Ignore);
    }

    #[test]
    fn payment_success_on_cancelled_booking_triggers_reconciliation() {
        let mut booking = pending_booking();
        booking.status = BookingStatus::Cancelled;
        assert_eq!(
            on_payment_succeeded(&booking),
            Decision::Reconcile(Reconciliation::RefundRequested)
        );
    }

    #[test]
    fn non_final_payment_failure_does_not_cancel() {
        let booking = pending_booking();
        let decision = on_payment_failed(&booking, "card declined", 1, false, 3);
        assert_eq!(decision, Decision::Ignore);
    }

    #[test]
    fn final_payment_failure_cancels_booking() {
        let booking = pending_booking();
        let decision = on_payment_failed(&booking, "card declined", 1, true, 3);
        assert_eq!(decision, Decision::Cancel { reason: "card declined".to_string() });
    }

    #[test]
    fn payment_failure_reaching_max_attempts_cancels_without_final_flag() {
        let booking = pending_booking();
        let decision = on_payment_failed(&booking, "gateway timeout", 3, false, 3);
        assert_eq!(decision, Decision::Cancel { reason: "gateway timeout".to_string() });
    }

    #[test]
    fn payment_failure_against_already_cancelled_booking_is_ignored() {
        let mut booking = pending_booking();
        booking.status = BookingStatus::Cancelled;
        assert_eq!(on_payment_failed(&booking, "x", 5, true, 3), Decision::Ignore);
    }
}
