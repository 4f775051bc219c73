//! `PostgreSQL`-backed implementation of the `EventStore` trait.
//!
//! Events for a stream live in the `events` table, one row per event, with a
//! monotonically increasing `version` column providing optimistic concurrency:
//! an append is only accepted if the caller's `expected_version` matches the
//! stream's current version at insert time. Snapshots live in a separate table
//! keyed by stream id.

use booking_core::event::SerializedEvent;
use booking_core::event_store::{EventStore, EventStoreError};
use booking_core::stream::{StreamId, Version};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// `PostgreSQL` event store.
///
/// # Example
///
/// ```no_run
/// use booking_postgres::PostgresEventStore;
///
/// # async fn example(pool: sqlx::PgPool) {
/// let store = PostgresEventStore::new(pool);
/// # let _ = store;
/// # }
/// ```
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl EventStore for PostgresEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            if events.is_empty() {
                let current = self.current_version(&stream_id).await?;
                return Ok(current);
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            let current_version: Option<(i64,)> = sqlx::query_as(
                r"SELECT MAX(version) FROM events WHERE stream_id = $1 FOR UPDATE",
            )
            .bind(stream_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            let current = current_version.map_or(Version::INITIAL, |(v,)| Version::new(v as u64));

            if let Some(expected) = expected_version {
                if expected != current {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual: current,
                    });
                }
            }

            let mut next_version = current;
            for event in &events {
                next_version = next_version.next();
                sqlx::query(
                    r"
                    INSERT INTO events (stream_id, version, event_type, event_data, metadata)
                    VALUES ($1, $2, $3, $4, $5)
                    ",
                )
                .bind(stream_id.as_str())
                .bind(next_version.value() as i64)
                .bind(&event.event_type)
                .bind(&event.data)
                .bind(&event.metadata)
                .execute(&mut *tx)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;
            }

            tx.commit()
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            metrics::counter!("event_store.append", "stream_id" => stream_id.into_inner())
                .increment(events.len() as u64);

            Ok(next_version)
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let from = from_version.map_or(0, |v| v.value() as i64);

            let rows = sqlx::query(
                r"
                SELECT event_type, event_data, metadata
                FROM events
                WHERE stream_id = $1 AND version > $2
                ORDER BY version ASC
                ",
            )
            .bind(stream_id.as_str())
            .bind(from)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            Ok(rows
                .iter()
                .map(|row| {
                    SerializedEvent::new(
                        row.get("event_type"),
                        row.get("event_data"),
                        row.get("metadata"),
                    )
                })
                .collect())
        })
    }

    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO snapshots (stream_id, version, state_data)
                VALUES ($1, $2, $3)
                ON CONFLICT (stream_id)
                DO UPDATE SET version = EXCLUDED.version, state_data = EXCLUDED.state_data
                ",
            )
            .bind(stream_id.as_str())
            .bind(version.value() as i64)
            .bind(&state)
            .execute(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            Ok(())
        })
    }

    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(Version, Vec<u8>)>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let row = sqlx::query(r"SELECT version, state_data FROM snapshots WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            Ok(row.map(|row| {
                let version: i64 = row.get("version");
                let state: Vec<u8> = row.get("state_data");
                (Version::new(version as u64), state)
            }))
        })
    }
}

impl PostgresEventStore {
    async fn current_version(&self, stream_id: &StreamId) -> Result<Version, EventStoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as(r"SELECT MAX(version) FROM events WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        Ok(row
            .map_or(Version::INITIAL, |(v,)| Version::new(v as u64)))
    }
}
