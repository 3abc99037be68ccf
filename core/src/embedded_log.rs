//! Embedded single-writer log.
//!
//! The embedded log gives a single process a durable, totally ordered event bus
//! without running a broker cluster. Durability is delegated to a
//! [`LogStorage`] (a relational table in production, memory in tests); the log
//! itself owns ordering.
//!
//! ```text
//!   send() ──► writer lock ──► next offset ──► storage.append() ──► notify
//!                                                                     │
//!   consume() ◄── storage.read_from(offset) ◄── wake on new append ◄──┘
//! ```
//!
//! Every topic has exactly one partition (`0`). Appends are serialised through
//! one writer lock, so offsets are dense and assigned in call order. The same
//! [`EmbeddedLog`] value implements both [`Producer`] and [`Consumer`].

use crate::event_bus::{
    BusFuture, ConsumedRecord, Consumer, DeliverySemantics, EventBusError, OutgoingRecord,
    Producer, RecordHeader, RecordStream, StartOffset, validate_topic,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

/// The only partition an embedded topic has.
pub const EMBEDDED_PARTITION: i32 = 0;

const DEFAULT_READ_BATCH: usize = 256;

/// A record as persisted by a [`LogStorage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRecord {
    /// Topic the record belongs to
    pub topic: String,
    /// Dense position within the topic
    pub offset: i64,
    /// Optional partitioning key
    pub key: Option<Vec<u8>>,
    /// Record payload
    pub value: Vec<u8>,
    /// Record headers
    pub headers: Vec<RecordHeader>,
    /// Time of append
    pub appended_at: DateTime<Utc>,
}

impl From<StoredRecord> for ConsumedRecord {
    fn from(record: StoredRecord) -> Self {
        Self {
            topic: record.topic,
            partition: EMBEDDED_PARTITION,
            offset: record.offset,
            key: record.key,
            value: record.value,
            headers: record.headers,
            timestamp: Some(record.appended_at),
        }
    }
}

/// Durable storage behind an [`EmbeddedLog`].
///
/// Implementations do not need to order concurrent appends; the log only ever
/// appends from behind its writer lock. They must reject a second record at an
/// offset that is already taken.
pub trait LogStorage: Send + Sync {
    /// Persist a record at its assigned offset.
    fn append(&self, record: StoredRecord) -> BusFuture<'_, ()>;

    /// Read up to `limit` records of `topic` with offset `>= from`, in offset order.
    fn read_from(&self, topic: &str, from: i64, limit: usize) -> BusFuture<'_, Vec<StoredRecord>>;

    /// The offset the next appended record of `topic` will get.
    fn next_offset(&self, topic: &str) -> BusFuture<'_, i64>;

    /// Release the storage's resources.
    ///
    /// The default does nothing.
    fn close(&self) -> BusFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Single-writer ordered log over a [`LogStorage`].
pub struct EmbeddedLog {
    storage: Arc<dyn LogStorage>,
    /// Next offset per topic; the lock is the single writer
    writer: Mutex<HashMap<String, i64>>,
    /// Bumped after every append so tailing readers wake up
    appended: watch::Sender<u64>,
    read_batch: usize,
}

impl EmbeddedLog {
    /// Create a log over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn LogStorage>) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            storage,
            writer: Mutex::new(HashMap::new()),
            appended,
            read_batch: DEFAULT_READ_BATCH,
        }
    }

    /// Change how many records a tailing reader fetches per storage round trip.
    #[must_use]
    pub fn with_read_batch(mut self, read_batch: usize) -> Self {
        self.read_batch = read_batch.max(1);
        self
    }

    async fn append(&self, record: OutgoingRecord) -> Result<i64, EventBusError> {
        validate_topic(&record.topic)?;

        let mut next_offsets = self.writer.lock().await;
        let offset = match next_offsets.get(&record.topic) {
            Some(offset) => *offset,
            None => self.storage.next_offset(&record.topic).await?,
        };

        let topic = record.topic.clone();
        let stored = self
            .storage
            .append(StoredRecord {
                topic: record.topic,
                offset,
                key: record.key,
                value: record.value,
                headers: record.headers,
                appended_at: Utc::now(),
            })
            .await;
        if let Err(e) = stored {
            // The row may have landed anyway; the next append asks storage again.
            next_offsets.remove(&topic);
            return Err(EventBusError::PublishFailed {
                topic,
                reason: e.to_string(),
            });
        }

        next_offsets.insert(topic.clone(), offset + 1);
        drop(next_offsets);

        self.appended.send_modify(|version| *version = version.wrapping_add(1));
        metrics::counter!("event_bus_records_published_total", "backend" => "embedded")
            .increment(1);
        tracing::trace!(topic = %topic, offset, "Record appended to embedded log");

        Ok(offset)
    }
}

impl Producer for EmbeddedLog {
    fn send(&self, record: OutgoingRecord) -> BusFuture<'_, (i32, i64)> {
        Box::pin(async move {
            let topic = record.topic.clone();
            match self.append(record).await {
                Ok(offset) => Ok((EMBEDDED_PARTITION, offset)),
                Err(e) => {
                    metrics::counter!("event_bus_publish_errors_total", "backend" => "embedded")
                        .increment(1);
                    tracing::error!(topic = %topic, error = %e, "Failed to append record");
                    Err(e)
                }
            }
        })
    }

    fn semantics(&self) -> DeliverySemantics {
        DeliverySemantics::ExactlyOnceInProcess
    }

    fn close(&self) -> BusFuture<'_, ()> {
        self.storage.close()
    }
}

impl Consumer for EmbeddedLog {
    fn partitions(&self, topic: &str) -> BusFuture<'_, Vec<i32>> {
        let topic = topic.to_string();
        Box::pin(async move {
            validate_topic(&topic)?;
            Ok(vec![EMBEDDED_PARTITION])
        })
    }

    fn consume(
        &self,
        topic: &str,
        partition: i32,
        start: StartOffset,
    ) -> BusFuture<'_, RecordStream> {
        let topic = topic.to_string();
        Box::pin(async move {
            validate_topic(&topic)?;
            if partition != EMBEDDED_PARTITION {
                return Err(EventBusError::UnknownPartition { topic, partition });
            }

            // Subscribe before resolving the start so no append is missed.
            let mut appended = self.appended.subscribe();
            let mut next = match start {
                StartOffset::Earliest => 0,
                StartOffset::At(offset) => offset.max(0),
                StartOffset::Latest => self.storage.next_offset(&topic).await.map_err(|e| {
                    EventBusError::ConsumeFailed {
                        topic: topic.clone(),
                        reason: e.to_string(),
                    }
                })?,
            };

            tracing::debug!(topic = %topic, start = next, "Opened embedded log stream");

            let storage = Arc::clone(&self.storage);
            let batch = self.read_batch;
            let stream = async_stream::stream! {
                loop {
                    appended.borrow_and_update();
                    match storage.read_from(&topic, next, batch).await {
                        Ok(records) if records.is_empty() => {
                            if appended.changed().await.is_err() {
                                break;
                            }
                        }
                        Ok(records) => {
                            for record in records {
                                next = record.offset + 1;
                                metrics::counter!(
                                    "event_bus_records_consumed_total",
                                    "backend" => "embedded"
                                )
                                .increment(1);
                                yield Ok(ConsumedRecord::from(record));
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                }
            };

            Ok(Box::pin(stream) as RecordStream)
        })
    }

    fn semantics(&self) -> DeliverySemantics {
        DeliverySemantics::ExactlyOnceInProcess
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct VecStorage {
        topics: StdMutex<BTreeMap<String, Vec<StoredRecord>>>,
        /// Store the next record, then report failure
        lose_ack: AtomicBool,
    }

    impl LogStorage for VecStorage {
        fn append(&self, record: StoredRecord) -> BusFuture<'_, ()> {
            Box::pin(async move {
                let mut topics = self.topics.lock().unwrap();
                let records = topics.entry(record.topic.clone()).or_default();
                if records.len() as i64 != record.offset {
                    return Err(EventBusError::Storage("duplicate key".to_string()));
                }
                records.push(record);
                if self.lose_ack.swap(false, Ordering::SeqCst) {
                    return Err(EventBusError::Storage("connection reset".to_string()));
                }
                Ok(())
            })
        }

        fn read_from(
            &self,
            topic: &str,
            from: i64,
            limit: usize,
        ) -> BusFuture<'_, Vec<StoredRecord>> {
            let topic = topic.to_string();
            Box::pin(async move {
                let topics = self.topics.lock().unwrap();
                Ok(topics
                    .get(&topic)
                    .map(|records| {
                        records
                            .iter()
                            .filter(|r| r.offset >= from)
                            .take(limit)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default())
            })
        }

        fn next_offset(&self, topic: &str) -> BusFuture<'_, i64> {
            let topic = topic.to_string();
            Box::pin(async move {
                let topics = self.topics.lock().unwrap();
                Ok(topics.get(&topic).map_or(0, |r| r.len() as i64))
            })
        }
    }

    fn log() -> Arc<EmbeddedLog> {
        Arc::new(EmbeddedLog::new(Arc::new(VecStorage::default())).with_read_batch(2))
    }

    #[tokio::test]
    async fn offsets_are_dense_per_topic() {
        let log = log();
        assert_eq!(log.send(OutgoingRecord::new("a", b"1".to_vec())).await.unwrap(), (0, 0));
        assert_eq!(log.send(OutgoingRecord::new("a", b"2".to_vec())).await.unwrap(), (0, 1));
        assert_eq!(log.send(OutgoingRecord::new("b", b"1".to_vec())).await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn replay_from_earliest_returns_records_in_order() {
        let log = log();
        for i in 0..5u8 {
            log.send(OutgoingRecord::new("events", vec![i])).await.unwrap();
        }

        let stream = log.consume("events", 0, StartOffset::Earliest).await.unwrap();
        let values: Vec<Vec<u8>> = stream
            .take(5)
            .map(|r| r.unwrap().value)
            .collect()
            .await;

        assert_eq!(values, (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn latest_only_sees_new_records() {
        let log = log();
        log.send(OutgoingRecord::new("events", b"old".to_vec())).await.unwrap();

        let mut stream = log.consume("events", 0, StartOffset::Latest).await.unwrap();
        log.send(OutgoingRecord::new("events", b"new".to_vec())).await.unwrap();

        let record = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("tailing stream should wake on append")
            .unwrap()
            .unwrap();
        assert_eq!(record.value, b"new".to_vec());
        assert_eq!(record.offset, 1);
    }

    #[tokio::test]
    async fn unknown_partition_is_rejected() {
        let log = log();
        let result = log.consume("events", 3, StartOffset::Earliest).await;
        assert!(matches!(result, Err(EventBusError::UnknownPartition { partition: 3, .. })));
    }

    #[tokio::test]
    async fn concurrent_senders_get_distinct_offsets() {
        let log = log();
        let mut tasks = Vec::new();
        for i in 0..20u8 {
            let log = Arc::clone(&log);
            tasks.push(tokio::spawn(async move {
                log.send(OutgoingRecord::new("events", vec![i])).await.unwrap().1
            }));
        }

        let mut offsets = Vec::new();
        for task in tasks {
            offsets.push(task.await.unwrap());
        }
        offsets.sort_unstable();
        assert_eq!(offsets, (0..20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn lost_acknowledgement_does_not_wedge_the_topic() {
        let storage = Arc::new(VecStorage::default());
        let log = EmbeddedLog::new(Arc::clone(&storage) as Arc<dyn LogStorage>);
        log.send(OutgoingRecord::new("events", b"0".to_vec())).await.unwrap();

        storage.lose_ack.store(true, Ordering::SeqCst);
        let err = log.send(OutgoingRecord::new("events", b"1".to_vec())).await.unwrap_err();
        assert!(matches!(err, EventBusError::PublishFailed { .. }));

        for expected in 2..5 {
            let (_, offset) = log
                .send(OutgoingRecord::new("events", b"n".to_vec()))
                .await
                .unwrap();
            assert_eq!(offset, expected);
        }
        assert_eq!(storage.next_offset("events").await.unwrap(), 5);
    }
}
