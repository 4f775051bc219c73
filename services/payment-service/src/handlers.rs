//! Queue handlers wiring the idempotent consumer runtime to the payment
//! attempt lifecycle: a first attempt on `InventoryReserved`, further
//! attempts on the service's own `RetryPayment` event.

use crate::domain::decide_after_attempt;
use crate::gateway::PaymentGateway;
use crate::repository::PaymentRepository;
use async_trait::async_trait;
use booking_core::context::{HandlerContext, Outcome};
use booking_core::event::SerializedEvent;
use booking_core::events::{decode, DomainEvent};
use booking_runtime::consumer::QueueHandler;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_METHOD: &str = "card";

/// Reacts to `InventoryReserved` by making the first payment attempt.
pub struct InventoryReservedHandler {
    repository: Arc<PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    max_attempts: u32,
}

impl InventoryReservedHandler {
    /// Build a handler over the given repository, gateway, and configured max attempts.
    #[must_use]
    pub const fn new(
        repository: Arc<PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        max_attempts: u32,
    ) -> Self {
        Self { repository, gateway, max_attempts }
    }
}

#[async_trait]
impl QueueHandler for InventoryReservedHandler {
    fn idempotency_key(&self, event: &SerializedEvent) -> String {
        match decode(event) {
            Ok(DomainEvent::InventoryReserved { booking_id, .. }) => format!("{booking_id}:ATTEMPT:1"),
            _ => format!("undecodable:{}", uuid::Uuid::new_v4()),
        }
    }

    async fn handle(&self, event: SerializedEvent, ctx: HandlerContext) -> Outcome<()> {
        let decoded = match decode(&event) {
            Ok(decoded) => decoded,
            Err(error) => return Outcome::permanent(error.to_string()),
        };
        let DomainEvent::InventoryReserved { booking_id, amount, .. } = decoded else {
            return Outcome::permanent("unexpected event type on inventory_reserved queue");
        };

        run_attempt(
            &self.repository,
            &*self.gateway,
            booking_id,
            amount,
            self.max_attempts,
            &ctx,
        )
        .await
    }
}

/// Reacts to the service's own `RetryPayment` event by waiting until
/// `retry_at` (bounded) and re-entering the attempt flow at `attempt + 1`.
pub struct RetryPaymentHandler {
    repository: Arc<PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    max_attempts: u32,
    max_retry_delay: Duration,
}

impl RetryPaymentHandler {
    /// Build a handler over the given repository, gateway, configured max
    /// attempts, and the cap on how long a single delivery will sleep
    /// waiting for `retry_at`.
    #[must_use]
    pub const fn new(
        repository: Arc<PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        max_attempts: u32,
        max_retry_delay: Duration,
    ) -> Self {
        Self { repository, gateway, max_attempts, max_retry_delay }
    }
}

#[async_trait]
impl QueueHandler for RetryPaymentHandler {
    fn idempotency_key(&self, event: &SerializedEvent) -> String {
        match decode(event) {
            Ok(DomainEvent::RetryPayment { booking_id, attempt, .. }) => {
                format!("{booking_id}:ATTEMPT:{}", attempt + 1)
            }
            _ => format!("undecodable:{}", uuid::Uuid::new_v4()),
        }
    }

    async fn handle(&self, event: SerializedEvent, ctx: HandlerContext) -> Outcome<()> {
        let decoded = match decode(&event) {
            Ok(decoded) => decoded,
            Err(error) => return Outcome::permanent(error.to_string()),
        };
        let DomainEvent::RetryPayment { booking_id, retry_at, .. } = decoded else {
            return Outcome::permanent("unexpected event type on retry_payment queue");
        };

        let wait = (retry_at - ctx.clock.now())
            .to_std()
            .unwrap_or_default()
            .min(self.max_retry_delay);
        if wait > Duration::ZERO {
            tokio::time::sleep(wait).await;
        }

        // amount isn't known without reloading the locked payment row; `begin_attempt`
        // tolerates being called with the wrong amount for a *retry* because it only
        // uses `amount` when inserting the very first attempt, which already happened.
        run_attempt(&self.repository, &*self.gateway, booking_id, 0, self.max_attempts, &ctx).await
    }
}

async fn run_attempt(
    repository: &PaymentRepository,
    gateway: &dyn PaymentGateway,
    booking_id: uuid::Uuid,
    amount: i64,
    max_attempts: u32,
    ctx: &HandlerContext,
) -> Outcome<()> {
    let payment = match repository.begin_attempt(booking_id, amount, DEFAULT_METHOD, ctx.clock.now()).await {
        Ok(Some(payment)) => payment,
        Ok(None) => return Outcome::Success(()),
        Err(error) => return Outcome::transient(error.to_string()),
    };

    let outcome = gateway.charge(payment.amount, &payment.method).await;
    let decision = decide_after_attempt(&outcome, payment.attempt_count, max_attempts, ctx.clock.now());

    match repository
        .record_attempt_outcome(&payment, decision, ctx.correlation_id.as_str(), ctx.clock.now())
        .await
    {
        Ok(()) => Outcome::Success(()),
        Err(error) => Outcome::transient(error.to_string()),
    }
}
