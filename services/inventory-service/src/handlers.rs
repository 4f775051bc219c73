//! Queue handlers wiring the idempotent consumer runtime to the inventory
//! entity's event reactions: reserve on `BookingCreated`, confirm on
//! `PaymentSucceeded`, release on a terminal `PaymentFailed`.

use crate::repository::{InventoryRepository, ReserveResult};
use async_trait::async_trait;
use booking_core::context::{HandlerContext, Outcome};
use booking_core::event::SerializedEvent;
use booking_core::events::{decode, DomainEvent};
use booking_runtime::consumer::QueueHandler;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;

/// Reacts to `BookingCreated` by attempting to reserve stock.
pub struct BookingCreatedHandler {
    repository: Arc<InventoryRepository>,
    reservation_ttl: ChronoDuration,
}

impl BookingCreatedHandler {
    /// Build a handler over the given repository and reservation TTL.
    #[must_use]
    pub const fn new(repository: Arc<InventoryRepository>, reservation_ttl: ChronoDuration) -> Self {
        Self { repository, reservation_ttl }
    }
}

#[async_trait]
impl QueueHandler for BookingCreatedHandler {
    fn idempotency_key(&self, event: &SerializedEvent) -> String {
        match decode(event) {
            Ok(DomainEvent::BookingCreated { booking_id, .. }) => format!("{booking_id}:RESERVE"),
            _ => format!("undecodable:{}", uuid::Uuid::new_v4()),
        }
    }

    async fn handle(&self, event: SerializedEvent, ctx: HandlerContext) -> Outcome<()> {
        let decoded = match decode(&event) {
            Ok(decoded) => decoded,
            Err(error) => return Outcome::permanent(error.to_string()),
        };
        let DomainEvent::BookingCreated { booking_id, item_ref, amount, .. } = decoded else {
            return Outcome::permanent("unexpected event type on booking_created queue");
        };

        let result = self
            .repository
            .reserve_for_booking(
                booking_id,
                &item_ref,
                amount,
                ctx.correlation_id.as_str(),
                ctx.clock.now(),
                self.reservation_ttl,
            )
            .await;

        match result {
            Ok(ReserveResult::Reserved(_) | ReserveResult::Insufficient(_)) => Outcome::Success(()),
            Err(error) => Outcome::transient(error.to_string()),
        }
    }
}

/// Reacts to `PaymentSucceeded` by confirming the reservation.
pub struct PaymentSucceededHandler {
    repository: Arc<InventoryRepository>,
}

impl PaymentSucceededHandler {
    /// Build a handler over the given repository.
    #[must_use]
    pub const fn new(repository: Arc<InventoryRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl QueueHandler for PaymentSucceededHandler {
    fn idempotency_key(&self, event: &SerializedEvent) -> String {
        match decode(event) {
            Ok(DomainEvent::PaymentSucceeded { booking_id, .. }) => format!("{booking_id}:CONFIRM_RES"),
            _ => format!("undecodable:{}", uuid::Uuid::new_v4()),
        }
    }

    async fn handle(&self, event: SerializedEvent, _ctx: HandlerContext) -> Outcome<()> {
        let decoded = match decode(&event) {
            Ok(decoded) => decoded,
            Err(error) => return Outcome::permanent(error.to_string()),
        };
        let DomainEvent::PaymentSucceeded { booking_id, .. } = decoded else {
            return Outcome::permanent("unexpected event type on payment_succeeded queue");
        };

        match self.repository.confirm_for_booking(booking_id).await {
            Ok(_confirmed) => Outcome::Success(()),
            Err(error) => Outcome::transient(error.to_string()),
        }
    }
}

/// Reacts to a terminal `PaymentFailed` by releasing the reservation. A
/// non-final failure is a no-op: the payment service will retry and the
/// reservation should keep holding stock.
pub struct PaymentFailedHandler {
    repository: Arc<InventoryRepository>,
}

impl PaymentFailedHandler {
    /// Build a handler over the given repository.
    #[must_use]
    pub const fn new(repository: Arc<InventoryRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl QueueHandler for PaymentFailedHandler {
    fn idempotency_key(&self, event: &SerializedEvent) -> String {
        match decode(event) {
            // Only a final failure ever mutates state; a non-final attempt is always a
            // harmless no-op, so it must not share the final attempt's key or it would
            // poison the ledger and cause the real release to be dropped as a duplicate.
            Ok(DomainEvent::PaymentFailed { booking_id, r#final: true, .. }) => {
                format!("{booking_id}:RELEASE_RES")
            }
            Ok(DomainEvent::PaymentFailed { booking_id, attempt_count, .. }) => {
                format!("{booking_id}:PAYMENT_FAILED_NONFINAL:{attempt_count}")
            }
            _ => format!("undecodable:{}", uuid::Uuid::new_v4()),
        }
    }

    async fn handle(&self, event: SerializedEvent, ctx: HandlerContext) -> Outcome<()> {
        let decoded = match decode(&event) {
            Ok(decoded) => decoded,
            Err(error) => return Outcome::permanent(error.to_string()),
        };
        let DomainEvent::PaymentFailed { booking_id, r#final, .. } = decoded else {
            return Outcome::permanent("unexpected event type on payment_failed queue");
        };

        if !r#final {
            return Outcome::Success(());
        }

        match self
            .repository
            .release_for_booking(booking_id, ctx.correlation_id.as_str(), ctx.clock.now())
            .await
        {
            Ok(_released) => Outcome::Success(()),
            Err(error) => Outcome::transient(error.to_string()),
        }
    }
}
