//! Idempotent consumer runtime.
//!
//! Wraps the subscribe-process-reconnect loop of the teacher's `EventConsumer`
//! with the idempotency ledger lookup, ack/nack-requeue/DLQ decision tree, and
//! correlation-id-carrying logging the booking platform's three services share.
//! Every consuming service (booking, inventory, payment) builds one [`IdempotentConsumer`]
//! per subscribed queue rather than hand-rolling its own subscribe loop.

use async_trait::async_trait;
use booking_core::context::{FailureClass, HandlerContext, Outcome};
use booking_core::environment::Clock;
use booking_core::event::SerializedEvent;
use booking_core::event_bus::{Delivery, EventBus};
use booking_postgres::{DeadLetterQueue, IdempotencyLedger, LedgerOutcome};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Application-specific event processing logic, invoked once per non-duplicate delivery.
///
/// Implementations deserialize `event.data`, perform the handler's local transaction
/// (domain mutation plus outbox insert, committed together), and classify the
/// result. They must never panic; infrastructure failures are [`FailureClass::Transient`],
/// decode/schema failures are [`FailureClass::Permanent`], and legitimate negative domain
/// outcomes are [`FailureClass::Business`] (still [`Outcome::Success`] from the consumer's
/// point of view — the handler has already turned it into an outbox event).
#[async_trait]
pub trait QueueHandler: Send + Sync {
    /// A key identifying this delivery for idempotency purposes, stable across
    /// redeliveries of the same logical event (prefer a domain key over the
    /// event's own id when the handler has one; see the queue-level idempotency
    /// key conventions recorded in `DESIGN.md`).
    fn idempotency_key(&self, event: &SerializedEvent) -> String;

    /// Process one delivery. Returning `Outcome::Success` acks (marks the ledger
    /// row completed); returning `Outcome::Failure` routes through the class's
    /// disposition (see [`IdempotentConsumer::process_one`]).
    async fn handle(&self, event: SerializedEvent, ctx: HandlerContext) -> Outcome<()>;
}

/// Subscribes to one or more broker queues and runs deliveries through the
/// idempotency ledger before invoking a [`QueueHandler`].
pub struct IdempotentConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    ledger: Arc<IdempotencyLedger>,
    dlq: Arc<DeadLetterQueue>,
    handler: Arc<dyn QueueHandler>,
    clock: Arc<dyn Clock>,
    service: &'static str,
    max_requeue: u32,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl IdempotentConsumer {
    /// Build a consumer for the given queue name(s).
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        ledger: Arc<IdempotencyLedger>,
        dlq: Arc<DeadLetterQueue>,
        handler: Arc<dyn QueueHandler>,
        clock: Arc<dyn Clock>,
        service: &'static str,
        max_requeue: u32,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            event_bus,
            ledger,
            dlq,
            handler,
            clock,
            service,
            max_requeue,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Override the reconnect-on-failure delay (default 5s).
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the subscribe-process-reconnect loop as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, "idempotent consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "idempotent consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.event_bus.subscribe(&topics) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, topics = ?self.topics, "subscribed to queues");
                            while let Some(next) = tokio::select! {
                                _ = self.shutdown.recv() => None,
                                item = stream.next() => Some(item),
                            } {
                                match next {
                                    Some(Ok(delivery)) => self.process_one(delivery).await,
                                    Some(Err(error)) => {
                                        error!(consumer = %self.name, %error, "error receiving delivery");
                                    }
                                    None => {
                                        warn!(consumer = %self.name, "event stream ended, reconnecting in {:?}", self.retry_delay);
                                        break;
                                    }
                                }
                            }
                            tokio::time::sleep(self.retry_delay).await;
                        }
                        Err(error) => {
                            error!(consumer = %self.name, %error, "subscribe failed, retrying in {:?}", self.retry_delay);
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "idempotent consumer stopped");
    }

    /// Run one delivery through the ledger lookup, handler, and disposition logic.
    ///
    /// The broker's `Acker` commits (or withholds) the offset based on what the
    /// ledger and handler decide here, never at delivery time: see [`Self::dispose`].
    /// `pub` so tests can drive deliveries directly without a real `EventBus`
    /// subscription loop; [`Self::run`] is the only production caller.
    pub async fn process_one(&self, delivery: Delivery) {
        let Delivery { event, acker } = delivery;

        let correlation_id = event
            .metadata
            .as_ref()
            .and_then(|m| m.get("correlation_id"))
            .and_then(|v| v.as_str())
            .map(booking_core::context::CorrelationId::from_str)
            .unwrap_or_default();

        let key = self.handler.idempotency_key(&event);

        let (outcome, redelivery_count) = match self.ledger.try_begin(&key).await {
            Ok(LedgerOutcome::Completed) => {
                metrics::counter!("consumer.duplicate_dropped", "consumer" => self.name.clone())
                    .increment(1);
                if let Err(error) = acker.ack().await {
                    error!(consumer = %self.name, key = %key, %error, "failed to ack already-completed delivery");
                }
                return;
            }
            Ok(LedgerOutcome::InProgress { redelivery_count }) => {
                // A prior attempt at this key is still marked in-progress: either a
                // genuine concurrent duplicate, or (the common case) our own consumer's
                // nack coming back around after a transient failure. Idempotent handlers
                // must tolerate both the same way, so we run the handler again and carry
                // the accumulated redelivery_count into dispose()'s budget check.
                warn!(consumer = %self.name, key = %key, redelivery_count, "delivery already in progress, reprocessing");
                metrics::counter!("consumer.requeued", "consumer" => self.name.clone()).increment(1);
                let ctx = HandlerContext::new(correlation_id, Arc::clone(&self.clock), self.service);
                (self.handler.handle(event.clone(), ctx).await, redelivery_count)
            }
            Ok(LedgerOutcome::Fresh) => {
                let ctx = HandlerContext::new(correlation_id, Arc::clone(&self.clock), self.service);
                (self.handler.handle(event.clone(), ctx).await, 0_i64)
            }
            Err(error) => {
                error!(consumer = %self.name, key = %key, %error, "idempotency ledger unavailable");
                if let Err(error) = acker.nack(true).await {
                    error!(consumer = %self.name, key = %key, %error, "failed to nack delivery after ledger error");
                }
                return;
            }
        };

        self.dispose(&key, &event, outcome, redelivery_count, acker.as_ref()).await;
    }

    /// Decide the outcome's disposition and only then tell the `Acker` whether to
    /// commit. Success, business outcomes, and anything that reaches the DLQ are
    /// acked (the delivery must never come back); a transient failure still under
    /// budget is nacked so the broker redelivers it.
    async fn dispose(
        &self,
        key: &str,
        event: &SerializedEvent,
        outcome: Outcome<()>,
        redelivery_count: i64,
        acker: &dyn booking_core::event_bus::Acker,
    ) {
        match outcome {
            Outcome::Success(()) => {
                if let Err(error) = self.ledger.complete(key).await {
                    error!(consumer = %self.name, key = %key, %error, "failed to mark ledger completed");
                }
                metrics::counter!("consumer.acked", "consumer" => self.name.clone()).increment(1);
                if let Err(error) = acker.ack().await {
                    error!(consumer = %self.name, key = %key, %error, "failed to ack successful delivery");
                }
            }
            Outcome::Failure { class: FailureClass::Business, reason } => {
                info!(consumer = %self.name, key = %key, reason = %reason, "business outcome, acking");
                if let Err(error) = self.ledger.complete(key).await {
                    error!(consumer = %self.name, key = %key, %error, "failed to mark ledger completed");
                }
                if let Err(error) = acker.ack().await {
                    error!(consumer = %self.name, key = %key, %error, "failed to ack business-outcome delivery");
                }
            }
            Outcome::Failure { class: FailureClass::Permanent, reason } => {
                warn!(consumer = %self.name, key = %key, reason = %reason, "permanent failure, routing to DLQ");
                self.dead_letter(event, &reason).await;
                let _ = self.ledger.clear_in_progress(key).await;
                if let Err(error) = acker.ack().await {
                    error!(consumer = %self.name, key = %key, %error, "failed to ack dead-lettered delivery");
                }
            }
            Outcome::Failure { class: FailureClass::Transient, reason } => {
                if redelivery_count >= i64::from(self.max_requeue) {
                    warn!(consumer = %self.name, key = %key, reason = %reason, redelivery_count, "transient failures exhausted requeue budget, routing to DLQ");
                    self.dead_letter(event, &reason).await;
                    let _ = self.ledger.clear_in_progress(key).await;
                    if let Err(error) = acker.ack().await {
                        error!(consumer = %self.name, key = %key, %error, "failed to ack exhausted-retry delivery");
                    }
                } else {
                    warn!(consumer = %self.name, key = %key, reason = %reason, redelivery_count, "transient failure, nacking for redelivery");
                    metrics::counter!("consumer.nacked_requeue", "consumer" => self.name.clone()).increment(1);
                    // Leave the ledger row `in_progress`: the next delivery for this key
                    // goes through the `InProgress` branch of `process_one`, which keeps
                    // `redelivery_count` climbing instead of resetting to 0.
                    if let Err(error) = acker.nack(true).await {
                        error!(consumer = %self.name, key = %key, %error, "failed to nack transient-failure delivery");
                    }
                }
            }
        }
    }

    async fn dead_letter(&self, event: &SerializedEvent, reason: &str) {
        let now = self.clock.now();
        if let Err(error) = self
            .dlq
            .add_entry(&self.name, event, now, reason, None, 0)
            .await
        {
            error!(consumer = %self.name, %error, "failed to write dead letter entry");
        }
        metrics::counter!("consumer.dead_lettered", "consumer" => self.name.clone()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_class_transient_round_trips_through_outcome() {
        let outcome: Outcome<()> = Outcome::transient("boom");
        match outcome {
            Outcome::Failure { class, .. } => assert_eq!(class, FailureClass::Transient),
            Outcome::Success(()) => unreachable!("transient outcome is never a success"),
        }
    }
}
