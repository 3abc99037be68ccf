//! Integration tests for the external event bus with a real Kafka instance.
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p plinth-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use plinth_core::config::EventBusConfig;
use plinth_core::event_bus::{Consumer, OutgoingRecord, Producer, StartOffset};
use plinth_redpanda::{RedpandaProducer, connect};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let producer = RedpandaProducer::new(&brokers).expect("producer");
    for attempt in 1..=60 {
        if producer
            .send(OutgoingRecord::new("warmup-topic", vec![1]))
            .await
            .is_ok()
        {
            tokio::time::sleep(Duration::from_millis(500)).await;
            return (kafka, brokers);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Kafka failed to become ready");
    }
    unreachable!()
}

fn bus_config(brokers: &str) -> EventBusConfig {
    EventBusConfig {
        addresses: vec![brokers.to_string()],
        connect_timeout_secs: 10,
        ..EventBusConfig::default()
    }
}

#[tokio::test]
#[ignore]
async fn test_connect_returns_independent_handles() {
    let (_kafka, brokers) = start_kafka().await;
    let (producer, consumer) = connect(&bus_config(&brokers), "roomserver")
        .await
        .expect("connect");

    assert_eq!(producer.brokers(), brokers);
    assert_eq!(consumer.brokers(), brokers);
}

#[tokio::test]
#[ignore]
async fn test_replay_partition_in_order() {
    let (_kafka, brokers) = start_kafka().await;
    let (producer, consumer) = connect(&bus_config(&brokers), "syncapi")
        .await
        .expect("connect");

    let mut offsets = Vec::new();
    for i in 0..5u8 {
        let (partition, offset) = producer
            .send(OutgoingRecord::new("replay-events", vec![i]).with_key(b"same-key".to_vec()))
            .await
            .expect("send");
        offsets.push((partition, offset));
    }
    let partition = offsets[0].0;
    assert!(offsets.iter().all(|(p, _)| *p == partition));

    let partitions = consumer.partitions("replay-events").await.expect("partitions");
    assert!(partitions.contains(&partition));

    let stream = consumer
        .consume("replay-events", partition, StartOffset::At(offsets[0].1))
        .await
        .expect("consume");

    let values: Vec<Vec<u8>> = tokio::time::timeout(
        Duration::from_secs(15),
        stream.take(5).map(|r| r.expect("record").value).collect(),
    )
    .await
    .expect("timed out waiting for records");

    assert_eq!(values, (0..5u8).map(|i| vec![i]).collect::<Vec<_>>());
}
