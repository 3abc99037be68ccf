//! Ordered event bus capabilities shared by every component.
//!
//! Components never talk to a concrete broker. They hold a [`Producer`] and a
//! [`Consumer`] behind `Arc<dyn ...>` and the process bootstrap decides which
//! backend sits behind them.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────┐
//!            │      Component       │
//!            └───┬──────────────▲───┘
//!         send() │              │ consume()
//!                ▼              │
//!   ┌────────────────────────────────────────┐
//!   │   Arc<dyn Producer> / Arc<dyn Consumer> │
//!   └──────┬──────────────────────────┬──────┘
//!          │                          │
//!          ▼                          ▼
//!   ┌──────────────┐          ┌────────────────┐
//!   │ Embedded log │          │ External broker│
//!   │ (one writer, │          │ (per-partition │
//!   │  one order)  │          │   ordering)    │
//!   └──────────────┘          └────────────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! The two backends do not offer the same guarantee and this module does not
//! pretend otherwise. Each backend reports its [`DeliverySemantics`]:
//!
//! - **Embedded log**: every record gets a position in one total order, replay
//!   from any offset returns exactly the appended records in append order.
//! - **External broker**: at-least-once delivery, ordered within a partition.
//!
//! # Dyn Compatibility
//!
//! Both traits return `Pin<Box<dyn Future>>` rather than using `async fn` so
//! they can be held as `Arc<dyn Producer>` and `Arc<dyn Consumer>`.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    /// Failed to connect to the backing store or cluster
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to append or send a record to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to start consuming a topic
    #[error("Consume failed for topic '{topic}': {reason}")]
    ConsumeFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Topic name is empty or otherwise unusable
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Partition does not exist for the topic
    #[error("Unknown partition {partition} for topic '{topic}'")]
    UnknownPartition {
        /// The topic that was asked for
        topic: String,
        /// The partition that was asked for
        partition: i32,
    },

    /// The backing storage rejected an operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Timed out waiting on the backend
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// A single named header attached to a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Header name
    pub key: String,
    /// Header value
    pub value: Vec<u8>,
}

/// A record handed to a [`Producer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingRecord {
    /// Destination topic
    pub topic: String,
    /// Optional partitioning key
    pub key: Option<Vec<u8>>,
    /// Record payload
    pub value: Vec<u8>,
    /// Record headers
    pub headers: Vec<RecordHeader>,
}

impl OutgoingRecord {
    /// Create a record with a payload and no key or headers.
    #[must_use]
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            headers: Vec::new(),
        }
    }

    /// Set the partitioning key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(RecordHeader {
            key: key.into(),
            value: value.into(),
        });
        self
    }
}

/// A record delivered by a [`Consumer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumedRecord {
    /// Topic the record was read from
    pub topic: String,
    /// Partition the record was read from
    pub partition: i32,
    /// Position of the record within its partition
    pub offset: i64,
    /// Optional partitioning key
    pub key: Option<Vec<u8>>,
    /// Record payload
    pub value: Vec<u8>,
    /// Record headers
    pub headers: Vec<RecordHeader>,
    /// Time the backend accepted the record, when known
    pub timestamp: Option<DateTime<Utc>>,
}

/// Where a consumer starts reading a partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOffset {
    /// From the first retained record
    Earliest,
    /// Only records appended after the stream was opened
    Latest,
    /// From an explicit offset
    At(i64),
}

/// Delivery guarantee offered by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliverySemantics {
    /// One total order, exact replay, single process writer
    ExactlyOnceInProcess,
    /// Possible redelivery, ordering only within a partition
    AtLeastOncePerPartition,
}

/// Stream of consumed records.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<ConsumedRecord, EventBusError>> + Send>>;

/// Boxed future returned by event bus operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Publishing side of the event bus.
///
/// # Errors
///
/// Implementations return [`EventBusError::PublishFailed`] when the record
/// cannot be durably accepted.
pub trait Producer: Send + Sync {
    /// Send a record and return the `(partition, offset)` it was stored at.
    fn send(&self, record: OutgoingRecord) -> BusFuture<'_, (i32, i64)>;

    /// Delivery guarantee of this backend.
    fn semantics(&self) -> DeliverySemantics;

    /// Flush outstanding sends and release backend resources.
    ///
    /// The default does nothing.
    fn close(&self) -> BusFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Consuming side of the event bus.
pub trait Consumer: Send + Sync {
    /// List the partitions of a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConsumeFailed`] if the topic metadata cannot be read.
    fn partitions(&self, topic: &str) -> BusFuture<'_, Vec<i32>>;

    /// Open an ordered stream over one partition of a topic.
    ///
    /// The stream yields records in partition order starting at `start` and
    /// stays open, yielding new records as they arrive.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::UnknownPartition`] or
    /// [`EventBusError::ConsumeFailed`] if the stream cannot be opened.
    fn consume(
        &self,
        topic: &str,
        partition: i32,
        start: StartOffset,
    ) -> BusFuture<'_, RecordStream>;

    /// Delivery guarantee of this backend.
    fn semantics(&self) -> DeliverySemantics;
}

/// Reject empty topic names before they reach a backend.
///
/// # Errors
///
/// Returns [`EventBusError::InvalidTopic`] for an empty or whitespace topic.
pub fn validate_topic(topic: &str) -> Result<(), EventBusError> {
    if topic.trim().is_empty() {
        return Err(EventBusError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_builder_collects_headers() {
        let record = OutgoingRecord::new("roomserverOutput", b"{}".to_vec())
            .with_key(b"!room:example.org".to_vec())
            .with_header("event_type", b"m.room.message".to_vec());

        assert_eq!(record.topic, "roomserverOutput");
        assert_eq!(record.key.as_deref(), Some(&b"!room:example.org"[..]));
        assert_eq!(record.headers.len(), 1);
        assert_eq!(record.headers[0].key, "event_type");
    }

    #[test]
    fn empty_topic_is_rejected() {
        assert!(validate_topic("").is_err());
        assert!(validate_topic("   ").is_err());
        assert!(validate_topic("typingServerOutput").is_ok());
    }
}
