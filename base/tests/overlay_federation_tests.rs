//! Federation requests tunnelled between two overlay nodes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use plinth_base::federation::canonical_json;
use plinth_base::{FederationClient, FederationError};
use plinth_overlay::{Multiaddr, OverlayIdentity, OverlayRequest, OverlayResponse};
use plinth_testing::fixtures;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

async fn first_listen_address(identity: &OverlayIdentity) -> Multiaddr {
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

fn header<'a>(request: &'a OverlayRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Answers event fetches with a stub event and everything else with 404,
/// forwarding each request it saw.
fn answer_requests(remote: &OverlayIdentity) -> mpsc::UnboundedReceiver<OverlayRequest> {
    let mut inbound = remote.take_inbound_requests().unwrap();
    let (seen, requests) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(request) = inbound.recv().await {
            let response = if request.request.path.starts_with("/_matrix/federation/v1/event/") {
                OverlayResponse::json(200, br#"{"pdus":[{"type":"m.room.message"}]}"#.to_vec())
            } else {
                OverlayResponse::json(404, br#"{"errcode":"M_NOT_FOUND"}"#.to_vec())
            };
            let _ = seen.send(request.request.clone());
            request.respond(response).unwrap();
        }
    });
    requests
}

#[tokio::test]
async fn federation_client_tunnels_signed_requests() {
    let mut config = fixtures::loopback_overlay();
    config.request_timeout_secs = 5;

    let local_key = fixtures::signing_key(21);
    let local = plinth_overlay::join(&config, local_key.seed()).unwrap();
    let remote = plinth_overlay::join(&config, fixtures::signing_key(22).seed()).unwrap();
    let mut seen = answer_requests(&remote);

    let address = first_listen_address(&remote).await;
    local.handle().dial(remote.peer_id(), address).await.unwrap();

    let client = FederationClient::overlay(local.server_name(), local_key.clone(), local.handle());
    let destination = remote.server_name();

    let event = client.get_event(&destination, "$ev").await.unwrap();
    assert_eq!(event, json!({"pdus": [{"type": "m.room.message"}]}));

    let request = seen.recv().await.unwrap();
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/_matrix/federation/v1/event/%24ev");

    let authorization = header(&request, "authorization").expect("authorization header");
    let expected_prefix = format!(
        r#"X-Matrix origin="{}",destination="{destination}",key="{}",sig=""#,
        local.server_name(),
        fixtures::TEST_KEY_ID
    );
    assert!(authorization.starts_with(&expected_prefix), "{authorization}");

    let sig = authorization
        .rsplit("sig=\"")
        .next()
        .unwrap()
        .trim_end_matches('"');
    let sig = base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(sig)
        .unwrap();
    let signed = canonical_json(&json!({
        "method": "GET",
        "uri": "/_matrix/federation/v1/event/%24ev",
        "origin": local.server_name(),
        "destination": destination,
    }));
    VerifyingKey::from_bytes(&local_key.public_key())
        .unwrap()
        .verify(&signed, &Signature::from_slice(&sig).unwrap())
        .expect("signature should verify against the local key");

    let err = client
        .request_json("GET", &destination, "/_matrix/federation/v1/query/directory", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FederationError::Status { status: 404, .. }));

    local.shutdown().await;
    remote.shutdown().await;
}

#[tokio::test]
async fn dns_names_are_not_overlay_destinations() {
    let key = fixtures::signing_key(23);
    let local = plinth_overlay::join(&fixtures::loopback_overlay(), key.seed()).unwrap();
    let client = FederationClient::overlay(local.server_name(), key, local.handle());

    let err = client.get_server_keys("matrix.org").await.unwrap_err();
    assert!(matches!(
        err,
        FederationError::InvalidDestination { ref destination, .. } if destination == "matrix.org"
    ));

    local.shutdown().await;
}
