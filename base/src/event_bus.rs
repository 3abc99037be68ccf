//! Event bus selection.
//!
//! The backend is chosen once from `event_bus.use_embedded_log`:
//!
//! | Mode | Handles | Semantics |
//! |---|---|---|
//! | embedded | one [`EmbeddedLog`] shared as consumer and producer | exactly-once, one total order |
//! | external | independent rdkafka producer and consumer | at-least-once, ordered per partition |

use plinth_core::{
    BootError, Config, Consumer, DeliverySemantics, EmbeddedLog, LogStorage, Producer,
};
use plinth_postgres::PostgresLogStorage;
use std::fmt;
use std::sync::Arc;

/// The consumer and producer a component uses for inter-component events.
#[derive(Clone)]
pub struct EventBus {
    /// Reads records
    pub consumer: Arc<dyn Consumer>,
    /// Appends records
    pub producer: Arc<dyn Producer>,
    semantics: DeliverySemantics,
}

impl EventBus {
    /// Bus over one embedded log acting as both consumer and producer.
    #[must_use]
    pub fn embedded(log: Arc<EmbeddedLog>) -> Self {
        let consumer: Arc<dyn Consumer> = log.clone();
        let producer: Arc<dyn Producer> = log;
        Self {
            consumer,
            producer,
            semantics: DeliverySemantics::ExactlyOnceInProcess,
        }
    }

    /// Bus over independent consumer and producer handles.
    #[must_use]
    pub fn new(consumer: Arc<dyn Consumer>, producer: Arc<dyn Producer>) -> Self {
        let semantics = producer.semantics();
        Self {
            consumer,
            producer,
            semantics,
        }
    }

    /// Delivery guarantee of the backend.
    #[must_use]
    pub const fn semantics(&self) -> DeliverySemantics {
        self.semantics
    }

    /// Whether consumer and producer are the same object.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.consumer), Arc::as_ptr(&self.producer))
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("semantics", &self.semantics)
            .field("shared", &self.is_shared())
            .finish_non_exhaustive()
    }
}

/// Build the event bus for a component.
///
/// `storage` replaces the embedded log's relational store; it is ignored in
/// external mode.
///
/// # Errors
///
/// Returns [`BootError::EventBus`] if the backend cannot be reached.
pub async fn select_event_bus(
    config: &Config,
    component: &str,
    storage: Option<Arc<dyn LogStorage>>,
) -> Result<EventBus, BootError> {
    if config.event_bus.use_embedded_log {
        let storage = match storage {
            Some(storage) => storage,
            None => {
                let url = config
                    .database
                    .embedded_log
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| {
                        BootError::EventBus("no embedded log database configured".to_string())
                    })?;
                Arc::new(PostgresLogStorage::connect(url).await?) as Arc<dyn LogStorage>
            }
        };
        let bus = EventBus::embedded(Arc::new(EmbeddedLog::new(storage)));
        tracing::info!(component, semantics = ?bus.semantics(), "Using embedded event log");
        return Ok(bus);
    }

    let (producer, consumer) = plinth_redpanda::connect(&config.event_bus, component).await?;
    tracing::info!(
        component,
        brokers = %producer.brokers(),
        "Connected to external event bus"
    );
    Ok(EventBus::new(Arc::new(consumer), Arc::new(producer)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use plinth_core::{OutgoingRecord, StartOffset};
    use plinth_testing::InMemoryLogStorage;

    fn embedded_config() -> Config {
        let mut config = Config::default();
        config.event_bus.use_embedded_log = true;
        config
    }

    #[tokio::test]
    async fn embedded_mode_shares_one_handle() {
        let bus = select_event_bus(
            &embedded_config(),
            "roomserver",
            Some(Arc::new(InMemoryLogStorage::new())),
        )
        .await
        .unwrap();

        assert!(bus.is_shared());
        assert_eq!(bus.semantics(), DeliverySemantics::ExactlyOnceInProcess);
    }

    #[tokio::test]
    async fn embedded_mode_replays_in_append_order() {
        let bus = select_event_bus(
            &embedded_config(),
            "roomserver",
            Some(Arc::new(InMemoryLogStorage::new())),
        )
        .await
        .unwrap();

        for n in 0..10u8 {
            bus.producer
                .send(OutgoingRecord::new("roomserverOutput", vec![n]))
                .await
                .unwrap();
        }

        let records: Vec<_> = bus
            .consumer
            .consume("roomserverOutput", 0, StartOffset::Earliest)
            .await
            .unwrap()
            .take(10)
            .collect()
            .await;
        let values: Vec<u8> = records.into_iter().map(|r| r.unwrap().value[0]).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn embedded_mode_without_database_fails() {
        let err = select_event_bus(&embedded_config(), "roomserver", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::EventBus(_)));
    }
}
