//! Canonical domain event envelope shared by the booking, inventory, and
//! payment services.
//!
//! Every event carries `event_id`, `correlation_id`, and `occurred_at` plus
//! event-specific fields, matching the teacher's `Event` trait (`event_type()`,
//! `to_bytes()`, `from_bytes()`). Encoding is `bincode` over the
//! [`crate::event::SerializedEvent`] wire struct; the correlation id additionally
//! rides in `SerializedEvent::metadata` so the broker adapter and consumer
//! runtime can read it without decoding the payload.

use crate::event::{Event, EventError, SerializedEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the booking platform's stable, wire-level event types.
///
/// Unknown fields on a variant are preserved by bincode's forward-compatible
/// struct layout for fields present in both writer and reader schema; a
/// missing required field fails to decode and is classified `Permanent`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum DomainEvent {
    /// Emitted by the booking service when a booking is created.
    BookingCreated {
        /// Booking identifier.
        booking_id: Uuid,
        /// The user who placed the booking.
        user_id: String,
        /// Opaque room/resource identifier.
        item_ref: String,
        /// Fixed-point currency amount.
        amount: i64,
    },
    /// Emitted by the booking service when a booking is cancelled.
    BookingCancelled {
        /// Booking identifier.
        booking_id: Uuid,
        /// Human-readable cancellation reason.
        reason: String,
    },
    /// Emitted by the inventory service when a reservation succeeds.
    InventoryReserved {
        /// Booking identifier the reservation is for.
        booking_id: Uuid,
        /// Reservation identifier.
        reservation_id: Uuid,
        /// Opaque room/resource identifier.
        item_ref: String,
        /// Amount to charge, carried through so the payment service doesn't
        /// need a separate lookup.
        amount: i64,
        /// When this reservation expires if never confirmed.
        expires_at: DateTime<Utc>,
    },
    /// Emitted by the inventory service when a reservation cannot be made.
    InventoryReservationFailed {
        /// Booking identifier the reservation was for.
        booking_id: Uuid,
        /// Why the reservation failed (e.g. `"insufficient"`).
        reason: String,
    },
    /// Emitted by the inventory service when a reservation is released,
    /// either by a `PaymentFailed{final: true}` reaction or by the
    /// expiration sweeper.
    InventoryReleased {
        /// Booking identifier the reservation was for.
        booking_id: Uuid,
        /// Opaque room/resource identifier.
        item_ref: String,
        /// Quantity returned to `available`.
        quantity: i64,
    },
    /// Emitted by the payment service when a payment attempt succeeds.
    PaymentSucceeded {
        /// Booking identifier the payment was for.
        booking_id: Uuid,
        /// Payment identifier.
        payment_id: Uuid,
        /// Gateway transaction identifier.
        transaction_id: String,
    },
    /// Emitted by the payment service when a payment attempt fails.
    PaymentFailed {
        /// Booking identifier the payment was for.
        booking_id: Uuid,
        /// Human-readable failure reason.
        reason: String,
        /// Which attempt this was (1-indexed).
        attempt_count: u32,
        /// Whether this failure exhausted all attempts.
        r#final: bool,
    },
    /// Emitted by the payment service to schedule its own retry after a
    /// non-final failure; consumed by the payment service itself.
    RetryPayment {
        /// Booking identifier to retry payment for.
        booking_id: Uuid,
        /// The attempt number that just failed.
        attempt: u32,
        /// When the retry should be attempted.
        retry_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The stable queue name this event is published to (see external interfaces).
    ///
    /// `BookingCancelled` maps to the wire identifier `bookingcancelled`
    /// (no underscore) — preserved verbatim even though it breaks the
    /// naming convention of its siblings.
    #[must_use]
    pub const fn queue(&self) -> &'static str {
        match self {
            Self::BookingCreated { .. } => "booking_created",
            Self::BookingCancelled { .. } => "bookingcancelled",
            Self::InventoryReserved { .. } => "inventory_reserved",
            Self::InventoryReservationFailed { .. } => "inventory_reservation_failed",
            Self::InventoryReleased { .. } => "inventory_released",
            Self::PaymentSucceeded { .. } => "payment_succeeded",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::RetryPayment { .. } => "retry_payment",
        }
    }
}

/// Map a stable `event_type()` string (as stored in the outbox / on the wire)
/// to the queue it publishes to, without decoding the event payload.
///
/// Used by the outbox publisher, which only has the event type and encoded
/// bytes on hand and should not pay for a full decode just to route.
#[must_use]
pub const fn queue_for_event_type(event_type: &str) -> Option<&'static str> {
    match event_type.as_bytes() {
        b"BookingCreated.v1" => Some("booking_created"),
        b"BookingCancelled.v1" => Some("bookingcancelled"),
        b"InventoryReserved.v1" => Some("inventory_reserved"),
        b"InventoryReservationFailed.v1" => Some("inventory_reservation_failed"),
        b"InventoryReleased.v1" => Some("inventory_released"),
        b"PaymentSucceeded.v1" => Some("payment_succeeded"),
        b"PaymentFailed.v1" => Some("payment_failed"),
        b"RetryPayment.v1" => Some("retry_payment"),
        _ => None,
    }
}

impl Event for DomainEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::BookingCreated { .. } => "BookingCreated.v1",
            Self::BookingCancelled { .. } => "BookingCancelled.v1",
            Self::InventoryReserved { .. } => "InventoryReserved.v1",
            Self::InventoryReservationFailed { .. } => "InventoryReservationFailed.v1",
            Self::InventoryReleased { .. } => "InventoryReleased.v1",
            Self::PaymentSucceeded { .. } => "PaymentSucceeded.v1",
            Self::PaymentFailed { .. } => "PaymentFailed.v1",
            Self::RetryPayment { .. } => "RetryPayment.v1",
        }
    }
}

/// Wrap a [`DomainEvent`] as a [`SerializedEvent`] ready for the outbox,
/// stamping `correlation_id` and `event_id` into the wire metadata.
///
/// # Errors
///
/// Returns [`EventError::SerializationError`] if bincode encoding fails.
pub fn envelope(
    event: &DomainEvent,
    correlation_id: &str,
) -> Result<SerializedEvent, EventError> {
    let data = event.to_bytes()?;
    let metadata = serde_json::json!({
        "event_id": Uuid::new_v4().to_string(),
        "correlation_id": correlation_id,
        "occurred_at": Utc::now().to_rfc3339(),
    });
    Ok(SerializedEvent::new(
        event.event_type().to_string(),
        data,
        Some(metadata),
    ))
}

/// Decode a [`SerializedEvent`] back into a [`DomainEvent`].
///
/// # Errors
///
/// Returns [`EventError::DeserializationError`] if the payload does not
/// decode as a [`DomainEvent`] (a permanent failure for the consumer runtime).
pub fn decode(event: &SerializedEvent) -> Result<DomainEvent, EventError> {
    DomainEvent::from_bytes(&event.data)
}

/// Read the `correlation_id` carried in a [`SerializedEvent`]'s metadata, if present.
#[must_use]
pub fn correlation_id_of(event: &SerializedEvent) -> Option<String> {
    event
        .metadata
        .as_ref()
        .and_then(|m| m.get("correlation_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let event = DomainEvent::BookingCreated {
            booking_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            item_ref: "room-1".to_string(),
            amount: 500,
        };
        let serialized = envelope(&event, "corr-1").expect("encode succeeds");
        assert_eq!(serialized.event_type, "BookingCreated.v1");
        assert_eq!(correlation_id_of(&serialized).as_deref(), Some("corr-1"));

        let decoded = decode(&serialized).expect("decode succeeds");
        assert_eq!(decoded, event);
    }

    #[test]
    fn queue_names_match_external_interface() {
        let cancelled = DomainEvent::BookingCancelled {
            booking_id: Uuid::new_v4(),
            reason: "x".to_string(),
        };
        assert_eq!(cancelled.queue(), "bookingcancelled");

        let created = DomainEvent::BookingCreated {
            booking_id: Uuid::new_v4(),
            user_id: "u".to_string(),
            item_ref: "i".to_string(),
            amount: 1,
        };
        assert_eq!(created.queue(), "booking_created");
    }

    #[test]
    fn decode_of_garbage_bytes_is_an_error() {
        let garbage = SerializedEvent::new("BookingCreated.v1".to_string(), vec![0xFF; 4], None);
        assert!(decode(&garbage).is_err());
    }
}
