//! Kafka-compatible external event bus for Plinth.
//!
//! This crate implements the [`Producer`] and [`Consumer`] capabilities from
//! `plinth-core` on top of rdkafka. Any Kafka-protocol cluster works: Redpanda,
//! Apache Kafka, MSK and so on.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────┐   send()    ┌──────────────────┐
//!   │  Component   │────────────►│ RedpandaProducer │──┐
//!   └──────┬───────┘             └──────────────────┘  │
//!          │ consume()                                 ▼
//!          │                 ┌──────────────────┐  ┌─────────┐
//!          └────────────────►│ RedpandaConsumer │◄─│ cluster │
//!                            └──────────────────┘  └─────────┘
//! ```
//!
//! Producer and consumer are independent handles bound to the same broker
//! addresses.
//!
//! # Delivery Semantics
//!
//! **At-least-once, ordered within a partition.** Consumers are assigned an
//! explicit partition and start offset; nothing is committed on their behalf,
//! so positions are owned by the component.
//!
//! # Example
//!
//! ```no_run
//! use plinth_redpanda::{RedpandaConsumer, RedpandaProducer};
//! use plinth_core::event_bus::{OutgoingRecord, Producer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let producer = RedpandaProducer::builder()
//!     .brokers("localhost:9092")
//!     .client_id("roomserver")
//!     .build()?;
//! producer.verify_reachable().await?;
//!
//! producer.send(OutgoingRecord::new("roomserverOutput", b"{}".to_vec())).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod consumer;

pub use consumer::RedpandaConsumer;

use plinth_core::config::EventBusConfig;
use plinth_core::event_bus::{
    BusFuture, DeliverySemantics, EventBusError, OutgoingRecord, Producer, validate_topic,
};
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use std::time::Duration;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishing handle on an external cluster.
#[derive(Clone)]
pub struct RedpandaProducer {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    connect_timeout: Duration,
}

impl RedpandaProducer {
    /// Create a producer with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the client cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaProducerBuilder {
        RedpandaProducerBuilder::default()
    }

    /// Broker bootstrap list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Ask the cluster for its metadata, failing if it does not answer in time.
    ///
    /// librdkafka connects lazily, so this is the only way to find out at
    /// startup that the cluster is unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if no broker answers within
    /// the connect timeout.
    pub async fn verify_reachable(&self) -> Result<(), EventBusError> {
        let producer = self.producer.clone();
        let timeout = self.connect_timeout;

        let lookup = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|metadata| metadata.brokers().len())
        });

        // The blocking call honours its own timeout; the outer one is a backstop.
        let brokers = tokio::time::timeout(timeout + Duration::from_secs(1), lookup)
            .await
            .map_err(|_| EventBusError::Timeout(timeout))?
            .map_err(|e| EventBusError::ConnectionFailed(format!("Metadata task failed: {e}")))?
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!(
                    "Cluster at '{}' unreachable: {e}",
                    self.brokers
                ))
            })?;

        tracing::info!(
            brokers = %self.brokers,
            broker_count = brokers,
            "Event bus cluster reachable"
        );
        Ok(())
    }
}

impl Producer for RedpandaProducer {
    fn send(&self, record: OutgoingRecord) -> BusFuture<'_, (i32, i64)> {
        Box::pin(async move {
            validate_topic(&record.topic)?;

            let headers = record.headers.iter().fold(OwnedHeaders::new(), |headers, h| {
                headers.insert(Header {
                    key: &h.key,
                    value: Some(&h.value),
                })
            });

            let mut kafka_record: FutureRecord<'_, Vec<u8>, Vec<u8>> =
                FutureRecord::to(&record.topic)
                    .payload(&record.value)
                    .headers(headers);
            if let Some(key) = &record.key {
                kafka_record = kafka_record.key(key);
            }

            match self.producer.send(kafka_record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    metrics::counter!("event_bus_records_published_total", "backend" => "external")
                        .increment(1);
                    tracing::debug!(
                        topic = %record.topic,
                        partition,
                        offset,
                        "Record published"
                    );
                    Ok((partition, offset))
                }
                Err((kafka_error, _)) => {
                    metrics::counter!("event_bus_publish_errors_total", "backend" => "external")
                        .increment(1);
                    tracing::error!(
                        topic = %record.topic,
                        error = %kafka_error,
                        "Failed to publish record"
                    );
                    Err(EventBusError::PublishFailed {
                        topic: record.topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn semantics(&self) -> DeliverySemantics {
        DeliverySemantics::AtLeastOncePerPartition
    }

    fn close(&self) -> BusFuture<'_, ()> {
        Box::pin(async move {
            let producer = self.producer.clone();
            let timeout = self.timeout;
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| EventBusError::TransportError(e.to_string()))?
                .map_err(|e| EventBusError::TransportError(format!("Flush failed: {e}")))?;
            tracing::debug!(brokers = %self.brokers, "Producer flushed");
            Ok(())
        })
    }
}

/// Builder for [`RedpandaProducer`].
#[derive(Default)]
pub struct RedpandaProducerBuilder {
    brokers: Option<String>,
    client_id: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl RedpandaProducerBuilder {
    /// Set the comma-separated broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Name the client after the component using it.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all". Default: "all".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec. Default: "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how long [`RedpandaProducer::verify_reachable`] waits. Default: 10 seconds.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Build the producer.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are missing or the
    /// client configuration is rejected.
    pub fn build(self) -> Result<RedpandaProducer, EventBusError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_SEND_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression);
        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }

        let producer: FutureProducer = config.create().map_err(|e| {
            EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(brokers = %brokers, acks, compression, "Event bus producer created");

        Ok(RedpandaProducer {
            producer,
            brokers,
            timeout,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        })
    }
}

/// Create a producer and consumer for `component` and check the cluster answers.
///
/// # Errors
///
/// Returns [`EventBusError::ConnectionFailed`] or [`EventBusError::Timeout`] if
/// the cluster cannot be reached within `config.connect_timeout_secs`.
pub async fn connect(
    config: &EventBusConfig,
    component: &str,
) -> Result<(RedpandaProducer, RedpandaConsumer), EventBusError> {
    let brokers = config.bootstrap_servers();
    let producer = RedpandaProducer::builder()
        .brokers(&brokers)
        .client_id(component)
        .connect_timeout(config.connect_timeout())
        .build()?;
    producer.verify_reachable().await?;

    let consumer = RedpandaConsumer::builder()
        .brokers(&brokers)
        .group_prefix(component)
        .metadata_timeout(config.connect_timeout())
        .build()?;

    Ok((producer, consumer))
}
