//! Two overlay nodes on loopback, multicast discovery off.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use plinth_core::config::OverlayConfig;
use plinth_overlay::{OverlayError, OverlayRequest, OverlayResponse, join};
use std::time::Duration;

fn loopback_config() -> OverlayConfig {
    OverlayConfig {
        listen_addresses: vec!["/ip4/127.0.0.1/tcp/0".to_string()],
        enable_mdns: false,
        request_timeout_secs: 5,
        ..OverlayConfig::default()
    }
}

async fn first_listen_address(
    identity: &plinth_overlay::OverlayIdentity,
) -> plinth_overlay::Multiaddr {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let addresses = identity.handle().listen_addresses().await.unwrap();
            if let Some(address) = addresses.into_iter().next() {
                return address;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("node never started listening")
}

#[tokio::test]
async fn server_name_is_stable_for_a_seed() {
    let a = join(&loopback_config(), [7u8; 32]).unwrap();
    let name = a.server_name();
    a.shutdown().await;

    let b = join(&loopback_config(), [7u8; 32]).unwrap();
    assert_eq!(b.server_name(), name);
    assert_eq!(b.peer_id(), plinth_overlay::identity::peer_id_from_seed([7u8; 32]).unwrap());
    b.shutdown().await;
}

#[tokio::test]
async fn nodes_dial_and_exchange_a_request() {
    let server = join(&loopback_config(), [1u8; 32]).unwrap();
    let client = join(&loopback_config(), [2u8; 32]).unwrap();

    let mut inbound = server.take_inbound_requests().unwrap();
    assert!(server.take_inbound_requests().is_none());

    tokio::spawn(async move {
        while let Some(request) = inbound.recv().await {
            let body = format!(r#"{{"path":"{}"}}"#, request.request.path).into_bytes();
            request.respond(OverlayResponse::json(200, body)).unwrap();
        }
    });

    let address = first_listen_address(&server).await;
    client
        .handle()
        .dial(server.peer_id(), address)
        .await
        .expect("dial should succeed");

    let connected = client.handle().connected_peers().await.unwrap();
    assert!(connected.contains(&server.peer_id()));

    let response = client
        .handle()
        .send_request(
            server.peer_id(),
            OverlayRequest {
                method: "GET".to_string(),
                path: "/_matrix/key/v2/server".to_string(),
                headers: Vec::new(),
                body: Vec::new(),
            },
        )
        .await
        .expect("request should be answered");

    assert_eq!(response.status, 200);
    assert_eq!(response.body, br#"{"path":"/_matrix/key/v2/server"}"#.to_vec());

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn requests_are_refused_until_a_handler_takes_them() {
    let server = join(&loopback_config(), [8u8; 32]).unwrap();
    let client = join(&loopback_config(), [9u8; 32]).unwrap();

    let address = first_listen_address(&server).await;
    client.handle().dial(server.peer_id(), address).await.unwrap();

    let request = OverlayRequest {
        method: "GET".to_string(),
        path: "/_matrix/federation/v1/version".to_string(),
        headers: Vec::new(),
        body: Vec::new(),
    };
    let refused = tokio::time::timeout(
        Duration::from_secs(2),
        client.handle().send_request(server.peer_id(), request.clone()),
    )
    .await
    .expect("refusal should be immediate")
    .unwrap();
    assert_eq!(refused.status, 503);

    let mut inbound = server.take_inbound_requests().unwrap();
    tokio::spawn(async move {
        while let Some(request) = inbound.recv().await {
            request.respond(OverlayResponse::json(200, b"{}".to_vec())).unwrap();
        }
    });
    let answered = client.handle().send_request(server.peer_id(), request).await.unwrap();
    assert_eq!(answered.status, 200);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn dialing_a_dead_address_fails_without_stopping_the_node() {
    let node = join(&loopback_config(), [3u8; 32]).unwrap();
    let stranger = plinth_overlay::identity::peer_id_from_seed([4u8; 32]).unwrap();

    let result = node
        .handle()
        .dial(stranger, "/ip4/127.0.0.1/tcp/1".parse().unwrap())
        .await;
    assert!(matches!(result, Err(OverlayError::Dial(_))));

    // Still serving commands.
    assert!(!node.handle().listen_addresses().await.unwrap().is_empty());
    node.shutdown().await;
}

#[tokio::test]
async fn cancel_runs_once_and_stops_the_host() {
    let node = join(&loopback_config(), [5u8; 32]).unwrap();
    let handle = node.handle();

    assert!(node.cancel());
    assert!(!node.cancel());
    assert!(node.is_cancelled());
    node.shutdown().await;

    assert_eq!(handle.connected_peers().await, Err(OverlayError::Stopped));
}

#[tokio::test]
async fn unparseable_listen_address_fails_the_join() {
    let config = OverlayConfig {
        listen_addresses: vec!["/ip4/127.0.0.1/tcp/notaport".to_string()],
        ..loopback_config()
    };
    assert!(matches!(join(&config, [6u8; 32]), Err(OverlayError::Address { .. })));
}
