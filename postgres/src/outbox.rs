//! Transactional outbox.
//!
//! A producer writes domain state and one or more outbox rows in a single local
//! ACID transaction (`insert`, called with the same [`sqlx::Transaction`] the
//! domain write uses). A background publisher later drains unpublished rows
//! (`claim_batch`) and marks them published on broker acknowledgment. No domain
//! write is lost if the publisher crashes; no event is emitted if the domain
//! write rolled back.

use chrono::{DateTime, Utc};
use sqlx::postgres::Postgres;
use sqlx::{PgPool, Row, Transaction};
use thiserror::Error;

/// Errors from outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// A row in the outbox table, claimed for publishing.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    /// Outbox row id.
    pub id: i64,
    /// Stable event type identifier (e.g. `BookingCreated.v1`).
    pub event_type: String,
    /// Opaque encoded event envelope.
    pub payload: Vec<u8>,
    /// Correlation id of the originating transaction; preserves FIFO per id.
    pub correlation_id: String,
    /// When the row was inserted.
    pub created_at: DateTime<Utc>,
    /// Number of publish attempts made so far.
    pub publish_attempts: i32,
}

/// `PostgreSQL`-backed outbox.
///
/// # Example
///
/// ```no_run
/// use booking_postgres::OutboxStore;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let outbox = OutboxStore::new(pool);
/// let mut batch = outbox.claim_batch(10).await?;
/// for message in batch.messages().to_vec() {
///     // publish `message.payload` to the broker, then:
///     batch.mark_published(message.id).await?;
/// }
/// batch.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct OutboxStore {
    pool: PgPool,
}

impl OutboxStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an outbox row as part of an in-flight domain transaction.
    ///
    /// Must be called with the same transaction the caller uses for the domain
    /// mutation that produced this event, so both commit or roll back together.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::DatabaseError`] if the insert fails.
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        correlation_id: &str,
        event_type: &str,
        payload: &[u8],
    ) -> Result<i64, OutboxError> {
        let row: (i64,) = sqlx::query_as(
            r"
            INSERT INTO outbox_messages (event_type, payload, correlation_id)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(event_type)
        .bind(payload)
        .bind(correlation_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| OutboxError::DatabaseError(e.to_string()))?;

        metrics::counter!("outbox.inserted", "event_type" => event_type.to_string()).increment(1);

        Ok(row.0)
    }

    /// Claim up to `batch_size` unpublished rows whose retry backoff has elapsed,
    /// ordered oldest-first, under `FOR UPDATE SKIP LOCKED` so multiple publisher
    /// instances can cooperate without coordinating explicitly.
    ///
    /// The returned [`OutboxBatch`] holds the claiming transaction open; callers
    /// drive each message through the broker, call [`OutboxBatch::mark_published`]
    /// or [`OutboxBatch::record_failure`] per row, then [`OutboxBatch::commit`].
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::DatabaseError`] if the claim query fails.
    pub async fn claim_batch(&self, batch_size: i64) -> Result<OutboxBatch, OutboxError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OutboxError::DatabaseError(e.to_string()))?;

        let rows = sqlx::query(
            r"
            SELECT id, event_type, payload, correlation_id, created_at, publish_attempts
            FROM outbox_messages
            WHERE published_at IS NULL AND next_attempt_at <= now()
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| OutboxError::DatabaseError(e.to_string()))?;

        let messages = rows
            .iter()
            .map(|row| OutboxMessage {
                id: row.get("id"),
                event_type: row.get("event_type"),
                payload: row.get("payload"),
                correlation_id: row.get("correlation_id"),
                created_at: row.get("created_at"),
                publish_attempts: row.get("publish_attempts"),
            })
            .collect();

        Ok(OutboxBatch { tx, messages })
    }
}

/// An open transaction holding a claimed batch of outbox rows.
///
/// Every row in the batch is locked until [`OutboxBatch::commit`] runs, so the
/// publisher must resolve each message (published or backed off) before
/// releasing the batch.
pub struct OutboxBatch {
    tx: Transaction<'static, Postgres>,
    messages: Vec<OutboxMessage>,
}

impl OutboxBatch {
    /// The rows claimed by this batch, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[OutboxMessage] {
        &self.messages
    }

    /// Mark a row published after the broker has acknowledged it.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::DatabaseError`] if the update fails.
    pub async fn mark_published(&mut self, id: i64) -> Result<(), OutboxError> {
        sqlx::query(r"UPDATE outbox_messages SET published_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| OutboxError::DatabaseError(e.to_string()))?;

        metrics::counter!("outbox.published").increment(1);
        Ok(())
    }

    /// Record a transient publish failure: bump `publish_attempts` and schedule
    /// `next_attempt_at` after `backoff`. The row remains unpublished and will be
    /// reclaimed on a future poll once the backoff elapses.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::DatabaseError`] if the update fails.
    pub async fn record_failure(
        &mut self,
        id: i64,
        backoff: std::time::Duration,
    ) -> Result<(), OutboxError> {
        #[allow(clippy::cast_possible_wrap)]
        let backoff_secs = backoff.as_secs() as i64;

        sqlx::query(
            r"
            UPDATE outbox_messages
            SET publish_attempts = publish_attempts + 1,
                next_attempt_at = now() + ($2 || ' seconds')::interval
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(backoff_secs.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| OutboxError::DatabaseError(e.to_string()))?;

        metrics::counter!("outbox.publish_failed").increment(1);
        Ok(())
    }

    /// Commit the batch, releasing the row locks.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::DatabaseError`] if the commit fails.
    pub async fn commit(self) -> Result<(), OutboxError> {
        self.tx
            .commit()
            .await
            .map_err(|e| OutboxError::DatabaseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbox_message_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<OutboxMessage>();
        assert_sync::<OutboxMessage>();
    }
}
