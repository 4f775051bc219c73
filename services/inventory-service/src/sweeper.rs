//! Periodic expiration sweeper: guarantees stock recovery even if a
//! `PaymentFailed` event is lost forever, by releasing any `RESERVED`
//! reservation whose hold has lapsed.

use crate::repository::InventoryRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Background worker that periodically sweeps expired reservations.
pub struct ExpirationSweeper {
    repository: Arc<InventoryRepository>,
    interval: Duration,
    batch_size: i64,
    shutdown: broadcast::Receiver<()>,
}

impl ExpirationSweeper {
    /// Build a sweeper over the given repository.
    #[must_use]
    pub fn new(
        repository: Arc<InventoryRepository>,
        interval: Duration,
        batch_size: i64,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self { repository, interval, batch_size, shutdown }
    }

    /// Spawn the sweep loop as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!("expiration sweeper started");
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("expiration sweeper received shutdown signal");
                    break;
                }
                () = tokio::time::sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
        info!("expiration sweeper stopped");
    }

    async fn sweep_once(&self) {
        match self.repository.sweep_expired(chrono::Utc::now(), self.batch_size).await {
            Ok(0) => {}
            Ok(count) => info!(count, "expiration sweeper released stale reservations"),
            Err(error) => error!(%error, "expiration sweeper failed"),
        }
    }
}
