//! `PostgreSQL` event store implementation for the booking platform.
//!
//! This crate provides a production-ready PostgreSQL-based event store that implements
//! the `EventStore` trait from `booking-core`. It uses sqlx for compile-time
//! checked queries and supports:
//!
//! - Event persistence with optimistic concurrency
//! - State snapshots for performance
//! - Connection pooling
//! - Transaction support
//!
//! # Example
//!
//! ```ignore
//! use booking_postgres::PostgresEventStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let event_store = PostgresEventStore::new("postgres://localhost/mydb").await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// `PostgresEventStore`: event and snapshot persistence.
pub mod event_store;

/// Transactional outbox: atomic domain-write + event emission, publisher-side drain.
pub mod outbox;

/// Idempotency ledger backing the idempotent consumer runtime.
pub mod idempotency;

/// Dead Letter Queue for events that exhausted retries.
pub mod dead_letter_queue;

pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedEvent};
pub use event_store::PostgresEventStore;
pub use idempotency::{IdempotencyLedger, LedgerOutcome, ProcessedEventStatus};
pub use outbox::{OutboxMessage, OutboxStore};
