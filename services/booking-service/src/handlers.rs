//! Queue handlers wiring the idempotent consumer runtime to the booking
//! entity's event reactions (see domain reactions for `InventoryReservationFailed`,
//! `PaymentSucceeded`, `PaymentFailed`).

use crate::domain::{self, BookingId};
use crate::repository::BookingRepository;
use async_trait::async_trait;
use booking_core::context::{HandlerContext, Outcome};
use booking_core::event::SerializedEvent;
use booking_core::events::{decode, DomainEvent};
use booking_runtime::consumer::QueueHandler;
use std::sync::Arc;

/// Reacts to `InventoryReservationFailed` by cancelling the booking.
pub struct InventoryReservationFailedHandler {
    repository: Arc<BookingRepository>,
}

impl InventoryReservationFailedHandler {
    /// Build a handler over the given repository.
    #[must_use]
    pub const fn new(repository: Arc<BookingRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl QueueHandler for InventoryReservationFailedHandler {
    fn idempotency_key(&self, event: &SerializedEvent) -> String {
        match decode(event) {
            Ok(DomainEvent::InventoryReservationFailed { booking_id, .. }) => {
                format!("{booking_id}:CANCELLED_INV")
            }
            _ => format!("undecodable:{}", uuid::Uuid::new_v4()),
        }
    }

    async fn handle(&self, event: SerializedEvent, ctx: HandlerContext) -> Outcome<()> {
        let decoded = match decode(&event) {
            Ok(decoded) => decoded,
            Err(error) => return Outcome::permanent(error.to_string()),
        };
        let DomainEvent::InventoryReservationFailed { booking_id, reason } = decoded else {
            return Outcome::permanent("unexpected event type on inventory_reservation_failed queue");
        };

        let result = self
            .repository
            .apply(
                BookingId(booking_id),
                ctx.correlation_id.as_str(),
                ctx.clock.now(),
                |booking| domain::on_inventory_reservation_failed(booking, &reason),
            )
            .await;

        match result {
            Ok(_decision) => Outcome::Success(()),
            Err(error) => Outcome::transient(error.to_string()),
        }
    }
}

/// Reacts to `PaymentSucceeded` by confirming the booking.
pub struct PaymentSucceededHandler {
    repository: Arc<BookingRepository>,
}

impl PaymentSucceededHandler {
    /// Build a handler over the given repository.
    #[must_use]
    pub const fn new(repository: Arc<BookingRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl QueueHandler for PaymentSucceededHandler {
    fn idempotency_key(&self, event: &SerializedEvent) -> String {
        match decode(event) {
            Ok(DomainEvent::PaymentSucceeded { booking_id, .. }) => {
                format!("{booking_id}:CONFIRM")
            }
            _ => format!("undecodable:{}", uuid::Uuid::new_v4()),
        }
    }

    async fn handle(&self, event: SerializedEvent, ctx: HandlerContext) -> Outcome<()> {
        let decoded = match decode(&event) {
            Ok(decoded) => decoded,
            Err(error) => return Outcome::permanent(error.to_string()),
        };
        let DomainEvent::PaymentSucceeded { booking_id, .. } = decoded else {
            return Outcome::permanent("unexpected event type on payment_succeeded queue");
        };

        let result = self
            .repository
            .apply(
                BookingId(booking_id),
                ctx.correlation_id.as_str(),
                ctx.clock.now(),
                |booking| domain::on_payment_succeeded(booking),
            )
            .await;

        match result {
            Ok(_decision) => Outcome::Success(()),
            Err(error) => Outcome::transient(error.to_string()),
        }
    }
}

/// Reacts to `PaymentFailed`, cancelling the booking only on a final failure.
pub struct PaymentFailedHandler {
    repository: Arc<BookingRepository>,
    max_attempts: u32,
}

impl PaymentFailedHandler {
    /// Build a handler over the given repository and the configured max payment attempts.
    #[must_use]
    pub const fn new(repository: Arc<BookingRepository>, max_attempts: u32) -> Self {
        Self { repository, max_attempts }
    }
}

#[async_trait]
impl QueueHandler for PaymentFailedHandler {
    fn idempotency_key(&self, event: &SerializedEvent) -> String {
        match decode(event) {
            Ok(DomainEvent::PaymentFailed { booking_id, attempt_count, .. }) => {
                format!("{booking_id}:PAYMENT_FAILED:{attempt_count}")
            }
            _ => format!("undecodable:{}", uuid::Uuid::new_v4()),
        }
    }

    async fn handle(&self, event: SerializedEvent, ctx: HandlerContext) -> Outcome<()> {
        let decoded = match decode(&event) {
            Ok(decoded) => decoded,
            Err(error) => return Outcome::permanent(error.to_string()),
        };
        let DomainEvent::PaymentFailed { booking_id, reason, attempt_count, r#final } = decoded
        else {
            return Outcome::permanent("unexpected event type on payment_failed queue");
        };

        let max_attempts = self.max_attempts;
        let result = self
            .repository
            .apply(
                BookingId(booking_id),
                ctx.correlation_id.as_str(),
                ctx.clock.now(),
                |booking| {
                    domain::on_payment_failed(booking, &reason, attempt_count, r#final, max_attempts)
                },
            )
            .await;

        match result {
            Ok(_decision) => Outcome::Success(()),
            Err(error) => Outcome::transient(error.to_string()),
        }
    }
}
