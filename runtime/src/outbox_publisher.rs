//! Background publisher draining the transactional outbox to the broker.
//!
//! One instance runs per producing service. Multiple instances of the same
//! service cooperate safely via `OutboxStore::claim_batch`'s
//! `FOR UPDATE SKIP LOCKED`; no additional leasing is implemented.

use booking_core::event::SerializedEvent;
use booking_core::event_bus::EventBus;
use booking_core::events::queue_for_event_type;
use booking_postgres::OutboxStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Tuning for one [`OutboxPublisher`] instance.
#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    /// How often to poll for unpublished rows.
    pub poll_interval: Duration,
    /// Maximum rows claimed per poll.
    pub batch_size: i64,
    /// Base backoff applied after a publish failure.
    pub backoff_base: Duration,
    /// Backoff cap; retries continue at this rate forever past the cap.
    pub backoff_cap: Duration,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 10,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

/// Drains [`OutboxStore`] rows to an [`EventBus`] on a fixed poll interval.
pub struct OutboxPublisher {
    name: String,
    outbox: Arc<OutboxStore>,
    event_bus: Arc<dyn EventBus>,
    config: OutboxPublisherConfig,
    shutdown: broadcast::Receiver<()>,
}

impl OutboxPublisher {
    /// Build a publisher for `name` (used only in logs/metrics labels).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        outbox: Arc<OutboxStore>,
        event_bus: Arc<dyn EventBus>,
        config: OutboxPublisherConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            outbox,
            event_bus,
            config,
            shutdown,
        }
    }

    /// Spawn the publisher loop as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(publisher = %self.name, "outbox publisher started");
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(publisher = %self.name, "outbox publisher received shutdown signal");
                    break;
                }
                () = tokio::time::sleep(self.config.poll_interval) => {
                    self.drain_once().await;
                }
            }
        }
        info!(publisher = %self.name, "outbox publisher stopped");
    }

    async fn drain_once(&self) {
        let mut batch = match self.outbox.claim_batch(self.config.batch_size).await {
            Ok(batch) => batch,
            Err(error) => {
                error!(publisher = %self.name, %error, "failed to claim outbox batch");
                return;
            }
        };

        let mut failed_correlation_ids = std::collections::HashSet::new();

        for message in batch.messages().to_vec() {
            if failed_correlation_ids.contains(&message.correlation_id) {
                continue;
            }

            let Some(topic) = queue_for_event_type(&message.event_type) else {
                error!(
                    publisher = %self.name,
                    event_type = %message.event_type,
                    "no queue mapping for event type, leaving row unpublished"
                );
                continue;
            };

            let envelope = SerializedEvent::new(
                message.event_type.clone(),
                message.payload.clone(),
                Some(serde_json::json!({ "correlation_id": message.correlation_id })),
            );

            match self.event_bus.publish(topic, &envelope).await {
                Ok(()) => {
                    if let Err(error) = batch.mark_published(message.id).await {
                        error!(publisher = %self.name, %error, "failed to mark outbox row published");
                    }
                }
                Err(error) => {
                    warn!(
                        publisher = %self.name,
                        %error,
                        event_type = %message.event_type,
                        "publish failed, blocking further rows for this correlation_id"
                    );
                    let backoff = backoff_for(message.publish_attempts, &self.config);
                    if let Err(error) = batch.record_failure(message.id, backoff).await {
                        error!(publisher = %self.name, %error, "failed to record outbox publish failure");
                    }
                    failed_correlation_ids.insert(message.correlation_id.clone());
                }
            }
        }

        if let Err(error) = batch.commit().await {
            error!(publisher = %self.name, %error, "failed to commit outbox batch");
        }
    }
}

fn backoff_for(attempts: i32, config: &OutboxPublisherConfig) -> Duration {
    let exponent = attempts.clamp(0, 16);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let scaled = config.backoff_base.as_millis().saturating_mul(1_u128 << exponent.min(10));
    let capped = scaled.min(config.backoff_cap.as_millis());
    Duration::from_millis(capped as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped() {
        let config = OutboxPublisherConfig::default();
        let backoff = backoff_for(100, &config);
        assert_eq!(backoff, config.backoff_cap);
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let config = OutboxPublisherConfig::default();
        assert!(backoff_for(2, &config) > backoff_for(0, &config));
    }
}
