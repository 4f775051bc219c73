//! Idempotency ledger backing the idempotent consumer runtime.
//!
//! One row per idempotency key (either a bare `event_id` or a `(domain_key,
//! target_transition)` pair the caller has already flattened to a string). The
//! row's insert-or-conflict is the mutual-exclusion primitive: concurrent
//! workers racing on the same key see one `Fresh` winner and everyone else sees
//! `InProgress` or `Completed`.

use sqlx::{PgPool, Row};
use thiserror::Error;

/// Errors from ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Status of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedEventStatus {
    /// A worker is currently handling this key.
    InProgress,
    /// Processing finished successfully; further deliveries are duplicates.
    Completed,
}

impl ProcessedEventStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    fn parse(s: &str) -> Result<Self, LedgerError> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(LedgerError::DatabaseError(format!(
                "invalid processed_events status: {other}"
            ))),
        }
    }
}

/// The result of attempting to claim an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// No prior row for this key; the caller now owns it and must eventually
    /// call [`IdempotencyLedger::complete`] or [`IdempotencyLedger::clear_in_progress`].
    Fresh,
    /// Another delivery is already in progress for this key. The caller should
    /// nack-requeue with backoff; `redelivery_count` is the count after this attempt.
    InProgress {
        /// Number of deliveries observed for this key so far, including this one.
        redelivery_count: i64,
    },
    /// This key already completed successfully; the caller should ack the
    /// duplicate delivery without re-running the handler.
    Completed,
}

/// `PostgreSQL`-backed idempotency ledger.
pub struct IdempotencyLedger {
    pool: PgPool,
}

impl IdempotencyLedger {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attempt to claim `idempotency_key` for processing.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DatabaseError`] if the underlying queries fail.
    pub async fn try_begin(&self, idempotency_key: &str) -> Result<LedgerOutcome, LedgerError> {
        let inserted = sqlx::query(
            r"
            INSERT INTO processed_events (idempotency_key, status, first_seen_at, redelivery_count)
            VALUES ($1, 'in_progress', now(), 0)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING idempotency_key
            ",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;

        if inserted.is_some() {
            return Ok(LedgerOutcome::Fresh);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;

        let row = sqlx::query(
            r"SELECT status, redelivery_count FROM processed_events WHERE idempotency_key = $1 FOR UPDATE",
        )
        .bind(idempotency_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;

        let status = ProcessedEventStatus::parse(row.get("status"))?;

        if status == ProcessedEventStatus::Completed {
            tx.commit()
                .await
                .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;
            return Ok(LedgerOutcome::Completed);
        }

        let redelivery_count: i64 = row.get("redelivery_count");
        let redelivery_count = redelivery_count + 1;

        sqlx::query(r"UPDATE processed_events SET redelivery_count = $1 WHERE idempotency_key = $2")
            .bind(redelivery_count)
            .bind(idempotency_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;

        metrics::counter!("idempotency.redelivered").increment(1);

        Ok(LedgerOutcome::InProgress { redelivery_count })
    }

    /// Mark a key completed after the handler succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DatabaseError`] if the update fails.
    pub async fn complete(&self, idempotency_key: &str) -> Result<(), LedgerError> {
        sqlx::query(
            r"UPDATE processed_events SET status = 'completed', completed_at = now() WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Release a key after the handler failed (transiently or permanently), so
    /// a future delivery can claim it again.
    ///
    /// This deletes the row rather than leaving it `in_progress` forever; the
    /// tradeoff is that `redelivery_count` resets to 0 on the next [`Self::try_begin`]
    /// for this key rather than continuing to climb. Callers that need an
    /// unbroken count across handler failures should track it themselves from
    /// the `redelivery_count` returned by the failed attempt's [`LedgerOutcome`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DatabaseError`] if the delete fails.
    pub async fn clear_in_progress(&self, idempotency_key: &str) -> Result<(), LedgerError> {
        sqlx::query(r"DELETE FROM processed_events WHERE idempotency_key = $1 AND status = 'in_progress'")
            .bind(idempotency_key)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [ProcessedEventStatus::InProgress, ProcessedEventStatus::Completed] {
            let s = status.as_str();
            assert_eq!(ProcessedEventStatus::parse(s).expect("valid status"), status);
        }
    }

    #[test]
    fn status_invalid() {
        assert!(ProcessedEventStatus::parse("bogus").is_err());
    }

    #[test]
    fn ledger_outcome_equality() {
        assert_eq!(
            LedgerOutcome::InProgress { redelivery_count: 2 },
            LedgerOutcome::InProgress { redelivery_count: 2 }
        );
        assert_ne!(LedgerOutcome::Fresh, LedgerOutcome::Completed);
    }
}
