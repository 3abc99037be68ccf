//! Partition-assigned consumer for the external cluster.

use chrono::DateTime;
use plinth_core::event_bus::{
    BusFuture, ConsumedRecord, Consumer, DeliverySemantics, EventBusError, RecordHeader,
    RecordStream, StartOffset, validate_topic,
};
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer as _, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::util::Timeout;
use std::time::Duration;

const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Consuming handle on an external cluster.
///
/// Each call to [`Consumer::consume`] creates its own client assigned to one
/// partition, so streams are independent of each other.
#[derive(Clone, Debug)]
pub struct RedpandaConsumer {
    brokers: String,
    group_prefix: String,
    buffer_size: usize,
    metadata_timeout: Duration,
}

impl RedpandaConsumer {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaConsumerBuilder {
        RedpandaConsumerBuilder::default()
    }

    /// Broker bootstrap list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn client_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000");
        config
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> ConsumedRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| RecordHeader {
                    key: h.key.to_string(),
                    value: h.value.map(<[u8]>::to_vec).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis),
    }
}

impl Consumer for RedpandaConsumer {
    fn partitions(&self, topic: &str) -> BusFuture<'_, Vec<i32>> {
        let topic = topic.to_string();
        Box::pin(async move {
            validate_topic(&topic)?;
            let config = self.client_config(&format!("{}-metadata", self.group_prefix));
            let timeout = self.metadata_timeout;
            let lookup_topic = topic.clone();

            let partitions = tokio::task::spawn_blocking(move || {
                let client: BaseConsumer = config.create().map_err(|e| e.to_string())?;
                let metadata = client
                    .fetch_metadata(Some(lookup_topic.as_str()), Timeout::After(timeout))
                    .map_err(|e| e.to_string())?;
                Ok::<_, String>(
                    metadata
                        .topics()
                        .iter()
                        .filter(|t| t.name() == lookup_topic)
                        .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                        .collect::<Vec<i32>>(),
                )
            })
            .await
            .map_err(|e| EventBusError::TransportError(e.to_string()))?
            .map_err(|reason| EventBusError::ConsumeFailed {
                topic: topic.clone(),
                reason,
            })?;

            if partitions.is_empty() {
                return Err(EventBusError::ConsumeFailed {
                    topic,
                    reason: "topic has no partitions".to_string(),
                });
            }
            Ok(partitions)
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
            let consume_failed = |reason: String| EventBusError::ConsumeFailed {
                topic: topic.clone(),
                reason,
            };

            let group_id = format!("{}-{topic}-{partition}", self.group_prefix);
            let consumer: StreamConsumer = self
                .client_config(&group_id)
                .create()
                .map_err(|e| consume_failed(format!("Failed to create consumer: {e}")))?;

            let offset = match start {
                StartOffset::Earliest => Offset::Beginning,
                StartOffset::Latest => Offset::End,
                StartOffset::At(offset) => Offset::Offset(offset),
            };
            let mut assignment = TopicPartitionList::new();
            assignment
                .add_partition_offset(&topic, partition, offset)
                .map_err(|e| consume_failed(e.to_string()))?;
            consumer
                .assign(&assignment)
                .map_err(|e| consume_failed(format!("Failed to assign partition: {e}")))?;

            tracing::info!(
                topic = %topic,
                partition,
                start = ?start,
                group_id = %group_id,
                "Consuming partition"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(self.buffer_size);
            tokio::spawn(async move {
                loop {
                    let result = tokio::select! {
                        () = tx.closed() => break,
                        result = consumer.recv() => result,
                    };
                    let item = match result {
                        Ok(message) => {
                            metrics::counter!(
                                "event_bus_records_consumed_total",
                                "backend" => "external"
                            )
                            .increment(1);
                            Ok(to_record(&message))
                        }
                        Err(e) => Err(EventBusError::TransportError(format!(
                            "Failed to receive message: {e}"
                        ))),
                    };
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
                tracing::debug!("Partition consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as RecordStream)
        })
    }

    fn semantics(&self) -> DeliverySemantics {
        DeliverySemantics::AtLeastOncePerPartition
    }
}

/// Builder for [`RedpandaConsumer`].
#[derive(Default)]
pub struct RedpandaConsumerBuilder {
    brokers: Option<String>,
    group_prefix: Option<String>,
    buffer_size: Option<usize>,
    metadata_timeout: Option<Duration>,
}

impl RedpandaConsumerBuilder {
    /// Set the comma-separated broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Prefix for generated consumer group IDs, usually the component name.
    #[must_use]
    pub fn group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_prefix = Some(prefix.into());
        self
    }

    /// Records buffered between the client and the stream. Default: 1000.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Timeout for metadata lookups. Default: 10 seconds.
    #[must_use]
    pub const fn metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = Some(timeout);
        self
    }

    /// Build the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are missing.
    pub fn build(self) -> Result<RedpandaConsumer, EventBusError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;

        Ok(RedpandaConsumer {
            brokers,
            group_prefix: self.group_prefix.unwrap_or_else(|| "plinth".to_string()),
            buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
            metadata_timeout: self.metadata_timeout.unwrap_or(Duration::from_secs(10)),
        })
    }
}
