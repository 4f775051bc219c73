//! In-memory `EventStore` and `EventBus` implementations for fast, deterministic tests.
//!
//! These fakes implement the same trait contracts as `booking-postgres`'s
//! `PostgresEventStore` and `booking-broker`'s `RabbitEventBus`, so reducers and
//! sagas can be exercised end-to-end without a database or broker.

use async_stream::stream;
use booking_core::event::SerializedEvent;
use booking_core::event_bus::{Acker, Delivery, EventBus, EventBusError, EventStream};
use booking_core::event_store::{EventStore, EventStoreError};
use booking_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// No-op [`Acker`] for [`InMemoryEventBus`].
///
/// A `broadcast` channel has no commit log to withhold: an event is delivered
/// to every subscriber exactly once, at publish time, with no redelivery path.
/// `ack`/`nack` are accepted but do nothing.
struct NoopAcker;

impl Acker for NoopAcker {
    fn ack(&self) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn nack(
        &self,
        _requeue: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// In-memory `EventStore` backed by a `HashMap` of streams.
///
/// Optimistic concurrency is enforced the same way `PostgresEventStore` enforces
/// it against the database: the expected version must match the stream's current
/// length before the append is applied.
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<StreamId, Vec<SerializedEvent>>>,
    snapshots: Mutex<HashMap<StreamId, (Version, Vec<u8>)>>,
}

impl InMemoryEventStore {
    /// Create a new, empty in-memory event store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events appended across all streams. Useful for asserting
    /// that a saga step actually wrote to the store.
    #[must_use]
    pub fn total_event_count(&self) -> usize {
        #[allow(clippy::unwrap_used)] // test-only type, poisoning means a prior test already panicked
        self.streams.lock().unwrap().values().map(Vec::len).sum()
    }
}

impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::unwrap_used)]
            let mut streams = self.streams.lock().unwrap();
            let stream = streams.entry(stream_id.clone()).or_default();
            let current_version = Version::new(stream.len() as u64);

            if let Some(expected) = expected_version {
                if expected != current_version {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual: current_version,
                    });
                }
            }

            stream.extend(events);
            Ok(Version::new(stream.len() as u64))
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            #[allow(clippy::unwrap_used)]
            let streams = self.streams.lock().unwrap();
            let Some(stream) = streams.get(&stream_id) else {
                return Ok(Vec::new());
            };

            let start = from_version.map_or(0, |v| v.value() as usize);
            Ok(stream.get(start..).map(<[_]>::to_vec).unwrap_or_default())
        })
    }

    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::unwrap_used)]
            self.snapshots
                .lock()
                .unwrap()
                .insert(stream_id, (version, state));
            Ok(())
        })
    }

    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(Version, Vec<u8>)>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            #[allow(clippy::unwrap_used)]
            Ok(self.snapshots.lock().unwrap().get(&stream_id).cloned())
        })
    }
}

/// In-memory `EventBus` backed by a `tokio::sync::broadcast` channel per topic.
///
/// Mirrors the at-least-once, ordered-per-topic semantics documented on
/// [`EventBus`]: every subscriber to a topic receives every event published to
/// it after the subscription was created. Events published before a subscriber
/// joins are not replayed, matching a broker consumer group starting from the
/// current offset.
pub struct InMemoryEventBus {
    topics: Mutex<HashMap<String, broadcast::Sender<SerializedEvent>>>,
    capacity: usize,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus with the default channel capacity (256).
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new in-memory event bus with a specific per-topic channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<SerializedEvent> {
        #[allow(clippy::unwrap_used)]
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let sender = self.sender_for(topic);
        let event = event.clone();
        Box::pin(async move {
            // No subscribers yet is not an error: matches a broker accepting a
            // publish with zero active consumer groups.
            let _ = sender.send(event);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let mut receivers: Vec<_> = topics
            .iter()
            .map(|topic| self.sender_for(topic).subscribe())
            .collect();

        Box::pin(async move {
            let event_stream: EventStream = Box::pin(stream! {
                loop {
                    if receivers.is_empty() {
                        break;
                    }
                    let (result, index, _) =
                        futures::future::select_all(receivers.iter_mut().map(|rx| Box::pin(rx.recv())))
                            .await;
                    match result {
                        Ok(event) => yield Ok(Delivery { event, acker: Arc::new(NoopAcker) }),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            yield Err(EventBusError::Other(format!(
                                "subscriber lagged, skipped {skipped} events"
                            )));
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            receivers.remove(index);
                        }
                    }
                }
            });
            Ok(event_stream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn append_and_load_roundtrip() {
        let store = InMemoryEventStore::new();
        let stream_id = StreamId::new("booking-1");
        let events = vec![SerializedEvent::new("BookingCreated.v1".to_string(), vec![1], None)];

        let version = store
            .append_events(stream_id.clone(), Some(Version::INITIAL), events)
            .await
            .expect("append should succeed");
        assert_eq!(version, Version::new(1));

        let loaded = store
            .load_events(stream_id, None)
            .await
            .expect("load should succeed");
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn append_with_wrong_expected_version_conflicts() {
        let store = InMemoryEventStore::new();
        let stream_id = StreamId::new("booking-1");

        store
            .append_events(
                stream_id.clone(),
                Some(Version::INITIAL),
                vec![SerializedEvent::new("BookingCreated.v1".to_string(), vec![], None)],
            )
            .await
            .expect("first append should succeed");

        let result = store
            .append_events(
                stream_id,
                Some(Version::INITIAL),
                vec![SerializedEvent::new("BookingCancelled.v1".to_string(), vec![], None)],
            )
            .await;

        assert!(matches!(result, Err(EventStoreError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn load_events_from_missing_stream_is_empty() {
        let store = InMemoryEventStore::new();
        let loaded = store
            .load_events(StreamId::new("never-seen"), None)
            .await
            .expect("load should succeed");
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let store = InMemoryEventStore::new();
        let stream_id = StreamId::new("booking-1");
        store
            .save_snapshot(stream_id.clone(), Version::new(10), vec![9, 9, 9])
            .await
            .expect("save should succeed");

        let snapshot = store
            .load_snapshot(stream_id)
            .await
            .expect("load should succeed");
        assert_eq!(snapshot, Some((Version::new(10), vec![9, 9, 9])));
    }

    #[tokio::test]
    async fn publish_then_subscribe_delivers_events() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus
            .subscribe(&["booking-events"])
            .await
            .expect("subscribe should succeed");

        bus.publish(
            "booking-events",
            &SerializedEvent::new("BookingCreated.v1".to_string(), vec![1, 2], None),
        )
        .await
        .expect("publish should succeed");

        let received = stream
            .next()
            .await
            .expect("stream should yield an event")
            .expect("event should not be an error");
        assert_eq!(received.event.event_type, "BookingCreated.v1");
        received.acker.ack().await.expect("ack should succeed");
    }

    #[tokio::test]
    async fn subscribers_do_not_see_events_published_before_they_joined() {
        let bus = InMemoryEventBus::new();
        bus.publish(
            "booking-events",
            &SerializedEvent::new("BookingCreated.v1".to_string(), vec![], None),
        )
        .await
        .expect("publish should succeed");

        let mut stream = bus
            .subscribe(&["booking-events"])
            .await
            .expect("subscribe should succeed");

        bus.publish(
            "booking-events",
            &SerializedEvent::new("BookingConfirmed.v1".to_string(), vec![], None),
        )
        .await
        .expect("publish should succeed");

        let received = stream
            .next()
            .await
            .expect("stream should yield an event")
            .expect("event should not be an error");
        assert_eq!(received.event.event_type, "BookingConfirmed.v1");
    }
}
