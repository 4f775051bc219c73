//! Runtime machinery shared by every service in the booking platform:
//! the idempotent consumer loop, the transactional outbox publisher, and
//! the metrics server each binary exposes alongside its HTTP/queue work.

/// Prometheus metrics server for exposing counters/histograms recorded throughout this crate.
pub mod metrics_server;

/// Idempotent consumer runtime shared by every queue-consuming service.
pub mod consumer;

/// Transactional outbox publisher shared by every event-producing service.
pub mod outbox_publisher;
