//! Persistence for [`InventoryItem`] and [`InventoryReservation`].
//!
//! Every mutation opens a transaction, takes a row-exclusive lock
//! (`SELECT ... FOR UPDATE`) on the affected item (and, where relevant, its
//! reservation), applies the matching pure transition from
//! [`crate::domain`], writes both rows back and the outbox event, then
//! commits. The lock serializes concurrent reserve/confirm/release attempts
//! against the same item; there is no optimistic-concurrency retry loop
//! here because the lock, not a version check, is what prevents the race.

use crate::domain::{self, InventoryItem, InventoryReservation, ReservationStatus};
use booking_core::events::{envelope, DomainEvent};
use booking_postgres::OutboxStore;
use chrono::{DateTime, Utc};
use sqlx::postgres::Postgres;
use sqlx::{PgPool, Row, Transaction};
use thiserror::Error;
use uuid::Uuid;

/// Errors from the inventory repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),
    /// The event envelope could not be encoded.
    #[error("event encode error: {0}")]
    Encode(String),
}

/// The result of attempting to reserve stock for a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveResult {
    /// Stock was reserved; holds the new reservation id.
    Reserved(Uuid),
    /// Stock could not be reserved; holds the reason recorded on the outbox event.
    Insufficient(String),
}

/// Persistence for the inventory item and reservation entities.
pub struct InventoryRepository {
    pool: PgPool,
    outbox: OutboxStore,
}

impl InventoryRepository {
    /// Wrap an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let outbox = OutboxStore::new(pool.clone());
        Self { pool, outbox }
    }

    /// React to `BookingCreated`: lock the item, attempt to reserve
    /// `quantity` units, and emit `InventoryReserved` or
    /// `InventoryReservationFailed` in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] on any database or encoding failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn reserve_for_booking(
        &self,
        booking_id: Uuid,
        item_id: &str,
        quantity: i64,
        correlation_id: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<ReserveResult, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let Some(mut item) = lock_item(&mut tx, item_id).await? else {
            let reason = "item not found".to_string();
            emit(
                &mut tx,
                &self.outbox,
                &DomainEvent::InventoryReservationFailed { booking_id, reason: reason.clone() },
                correlation_id,
            )
            .await?;
            tx.commit().await.map_err(db_err)?;
            tracing::warn!(%booking_id, item_id, "reservation rejected: item not found");
            metrics::counter!("inventory.reservation_failed").increment(1);
            return Ok(ReserveResult::Insufficient(reason));
        };

        match domain::reserve(&mut item, booking_id, quantity, now, ttl) {
            Ok(reservation) => {
                update_item(&mut tx, &item).await?;
                insert_reservation(&mut tx, &reservation).await?;
                emit(
                    &mut tx,
                    &self.outbox,
                    &DomainEvent::InventoryReserved {
                        booking_id,
                        reservation_id: reservation.id,
                        item_ref: reservation.item_id.clone(),
                        amount: reservation.quantity,
                        expires_at: reservation.expires_at,
                    },
                    correlation_id,
                )
                .await?;
                tx.commit().await.map_err(db_err)?;
                metrics::counter!("inventory.reserved").increment(1);
                Ok(ReserveResult::Reserved(reservation.id))
            }
            Err(insufficient) => {
                emit(
                    &mut tx,
                    &self.outbox,
                    &DomainEvent::InventoryReservationFailed {
                        booking_id,
                        reason: insufficient.reason.clone(),
                    },
                    correlation_id,
                )
                .await?;
                tx.commit().await.map_err(db_err)?;
                tracing::warn!(%booking_id, item_id, reason = %insufficient.reason, "reservation rejected: insufficient stock");
                metrics::counter!("inventory.reservation_failed").increment(1);
                Ok(ReserveResult::Insufficient(insufficient.reason))
            }
        }
    }

    /// React to `PaymentSucceeded`: confirm the booking's reservation,
    /// permanently consuming the held stock. No outbox event is emitted.
    /// Returns `false` if there was no `RESERVED` reservation for this
    /// booking (already confirmed, or the event is stale/duplicate).
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] on any database failure.
    pub async fn confirm_for_booking(&self, booking_id: Uuid) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let Some(mut reservation) = lock_reservation(&mut tx, booking_id).await? else {
            tx.commit().await.map_err(db_err)?;
            return Ok(false);
        };
        let Some(mut item) = lock_item(&mut tx, &reservation.item_id).await? else {
            tx.commit().await.map_err(db_err)?;
            return Ok(false);
        };

        let applied = domain::confirm(&mut reservation, &mut item);
        if applied {
            update_item(&mut tx, &item).await?;
            update_reservation(&mut tx, &reservation).await?;
            metrics::counter!("inventory.confirmed").increment(1);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(applied)
    }

    /// React to a terminal `PaymentFailed` or the expiration sweeper: release
    /// the booking's held reservation back to `available`, emitting
    /// `InventoryReleased`. Returns `false` if there was nothing to release.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] on any database or encoding failure.
    pub async fn release_for_booking(
        &self,
        booking_id: Uuid,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let Some(mut reservation) = lock_reservation(&mut tx, booking_id).await? else {
            tx.commit().await.map_err(db_err)?;
            return Ok(false);
        };
        let Some(mut item) = lock_item(&mut tx, &reservation.item_id).await? else {
            tx.commit().await.map_err(db_err)?;
            return Ok(false);
        };

        let applied = domain::release(&mut reservation, &mut item, now);
        if applied {
            update_item(&mut tx, &item).await?;
            update_reservation(&mut tx, &reservation).await?;
            emit(
                &mut tx,
                &self.outbox,
                &DomainEvent::InventoryReleased {
                    booking_id,
                    item_ref: item.item_id.clone(),
                    quantity: reservation.quantity,
                },
                correlation_id,
            )
            .await?;
            metrics::counter!("inventory.released").increment(1);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(applied)
    }

    /// Release every `RESERVED` reservation whose `expires_at` has passed,
    /// up to `batch_size` rows, emitting `InventoryReleased` per row. Used by
    /// the periodic expiration sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] on any database or encoding failure.
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<usize, RepositoryError> {
        let rows = sqlx::query(
            r"SELECT booking_id FROM inventory_reservations
              WHERE status = 'RESERVED' AND expires_at < $1
              ORDER BY expires_at ASC
              LIMIT $2",
        )
        .bind(now)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut released = 0usize;
        for row in rows {
            let booking_id: Uuid = row.get("booking_id");
            let correlation_id = format!("sweeper:{booking_id}");
            if self.release_for_booking(booking_id, &correlation_id, now).await? {
                released += 1;
                tracing::info!(%booking_id, "reservation expired, released by sweeper");
            }
        }
        Ok(released)
    }

}

fn db_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(error.to_string())
}

async fn lock_item(
    tx: &mut Transaction<'_, Postgres>,
    item_id: &str,
) -> Result<Option<InventoryItem>, RepositoryError> {
    let row = sqlx::query(
        r"SELECT item_id, name, total, available, reserved
          FROM inventory_items WHERE item_id = $1 FOR UPDATE",
    )
    .bind(item_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)?;

    Ok(row.map(|row| InventoryItem {
        item_id: row.get("item_id"),
        name: row.get("name"),
        total: row.get("total"),
        available: row.get("available"),
        reserved: row.get("reserved"),
    }))
}

async fn update_item(
    tx: &mut Transaction<'_, Postgres>,
    item: &InventoryItem,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"UPDATE inventory_items SET available = $1, reserved = $2 WHERE item_id = $3",
    )
    .bind(item.available)
    .bind(item.reserved)
    .bind(&item.item_id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_reservation(
    tx: &mut Transaction<'_, Postgres>,
    reservation: &InventoryReservation,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"INSERT INTO inventory_reservations
            (id, item_id, booking_id, quantity, status, expires_at, released_at)
          VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(reservation.id)
    .bind(&reservation.item_id)
    .bind(reservation.booking_id)
    .bind(reservation.quantity)
    .bind(reservation.status.as_str())
    .bind(reservation.expires_at)
    .bind(reservation.released_at)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn lock_reservation(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: Uuid,
) -> Result<Option<InventoryReservation>, RepositoryError> {
    let row = sqlx::query(
        r"SELECT id, item_id, booking_id, quantity, status, expires_at, released_at
          FROM inventory_reservations
          WHERE booking_id = $1 AND status = 'RESERVED'
          FOR UPDATE",
    )
    .bind(booking_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)?;

    row.map(|row| {
        let status_str: String = row.get("status");
        let status = ReservationStatus::parse(&status_str).map_err(RepositoryError::Database)?;
        Ok(InventoryReservation {
            id: row.get("id"),
            item_id: row.get("item_id"),
            booking_id: row.get("booking_id"),
            quantity: row.get("quantity"),
            status,
            expires_at: row.get("expires_at"),
            released_at: row.get("released_at"),
        })
    })
    .transpose()
}

async fn update_reservation(
    tx: &mut Transaction<'_, Postgres>,
    reservation: &InventoryReservation,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"UPDATE inventory_reservations SET status = $1, released_at = $2 WHERE id = $3",
    )
    .bind(reservation.status.as_str())
    .bind(reservation.released_at)
    .bind(reservation.id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
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
