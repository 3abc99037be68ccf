//! Network identity and federation transport selection.
//!
//! ```text
//!                 server_name == "p2p"?
//!   Unstarted ──────────┬──────────────────────────────┐
//!                   no  │                          yes │
//!                       ▼                              ▼
//!                 Conventional                  OverlayJoining
//!                                                 │         │
//!                                            ok   ▼         ▼  err
//!                                        OverlayActive   Terminated
//! ```
//!
//! The decision is made once. A failed overlay join is fatal; there is no
//! fallback to conventional federation.

use crate::federation::FederationClient;
use plinth_core::config::{OverlayConfig, ServerConfig};
use plinth_core::{BootError, SigningKeyMaterial};
use plinth_overlay::OverlayIdentity;
use std::fmt;

/// Progress of transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Nothing selected yet
    Unstarted,
    /// Federating over HTTPS under the configured server name
    Conventional,
    /// Joining the overlay
    OverlayJoining,
    /// Federating over the overlay under the peer ID
    OverlayActive,
    /// The overlay failed to join or has been cancelled
    Terminated,
}

/// The network a process federates over.
pub enum Network {
    /// HTTPS under a DNS server name
    Conventional,
    /// The libp2p overlay
    Overlay(OverlayIdentity),
}

impl Network {
    /// Current state of the transport.
    #[must_use]
    pub fn state(&self) -> TransportState {
        match self {
            Self::Conventional => TransportState::Conventional,
            Self::Overlay(identity) if identity.is_cancelled() => TransportState::Terminated,
            Self::Overlay(_) => TransportState::OverlayActive,
        }
    }

    /// The overlay identity, in overlay mode.
    #[must_use]
    pub const fn overlay(&self) -> Option<&OverlayIdentity> {
        match self {
            Self::Conventional => None,
            Self::Overlay(identity) => Some(identity),
        }
    }

    /// Whether this is the overlay.
    #[must_use]
    pub const fn is_overlay(&self) -> bool {
        matches!(self, Self::Overlay(_))
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conventional => f.write_str("Conventional"),
            Self::Overlay(identity) => write!(f, "Overlay({})", identity.peer_id()),
        }
    }
}

/// Result of transport selection.
#[derive(Debug)]
pub struct EstablishedTransport {
    /// Server name to run under: the configured name, or the peer ID in overlay mode
    pub server_name: String,
    /// Client for outbound federation on the chosen transport
    pub federation: FederationClient,
    /// The chosen network
    pub network: Network,
}

/// Select and set up the federation transport.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`BootError::OverlayJoin`] if the overlay identity cannot be
/// derived or the node cannot join.
pub fn establish_transport(
    server: &ServerConfig,
    overlay: &OverlayConfig,
    key: &SigningKeyMaterial,
    http: &reqwest::Client,
) -> Result<EstablishedTransport, BootError> {
    if !server.is_overlay() {
        tracing::info!(
            server_name = %server.server_name,
            key_id = %key.key_id(),
            state = ?TransportState::Conventional,
            "Using regular federation"
        );
        return Ok(EstablishedTransport {
            server_name: server.server_name.clone(),
            federation: FederationClient::https(
                server.server_name.clone(),
                key.clone(),
                http.clone(),
            ),
            network: Network::Conventional,
        });
    }

    tracing::debug!(state = ?TransportState::OverlayJoining, "Joining overlay network");
    let identity = plinth_overlay::join(overlay, key.seed()).map_err(|e| {
        tracing::error!(state = ?TransportState::Terminated, error = %e, "Overlay join failed");
        BootError::OverlayJoin(e.to_string())
    })?;

    let server_name = identity.server_name();
    tracing::info!(public_key = %key.public_key_base64(), "Overlay public key");
    tracing::info!(node_id = %server_name, "Overlay node ID");
    tracing::warn!(
        state = ?TransportState::OverlayActive,
        "Using overlay federation; federation with non-overlay servers will not work"
    );

    Ok(EstablishedTransport {
        federation: FederationClient::overlay(server_name.clone(), key.clone(), identity.handle()),
        server_name,
        network: Network::Overlay(identity),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key() -> SigningKeyMaterial {
        SigningKeyMaterial::from_seed("ed25519:t", [8u8; 32]).unwrap()
    }

    fn loopback_overlay() -> OverlayConfig {
        OverlayConfig {
            listen_addresses: vec!["/ip4/127.0.0.1/tcp/0".to_string()],
            enable_mdns: false,
            ..OverlayConfig::default()
        }
    }

    #[tokio::test]
    async fn other_names_stay_conventional() {
        let server = ServerConfig {
            server_name: "example.org".to_string(),
            ..ServerConfig::default()
        };
        let http = reqwest::Client::new();
        let transport = establish_transport(&server, &loopback_overlay(), &key(), &http).unwrap();

        assert_eq!(transport.server_name, "example.org");
        assert_eq!(transport.network.state(), TransportState::Conventional);
        assert!(transport.network.overlay().is_none());
        assert_eq!(transport.federation.transport().name(), "https");
    }

    #[tokio::test]
    async fn p2p_joins_the_overlay_under_the_peer_id() {
        let server = ServerConfig {
            server_name: "p2p".to_string(),
            ..ServerConfig::default()
        };
        let http = reqwest::Client::new();
        let transport = establish_transport(&server, &loopback_overlay(), &key(), &http).unwrap();

        assert_ne!(transport.server_name, "p2p");
        assert!(transport.server_name.starts_with("12D3KooW"));
        assert_eq!(transport.network.state(), TransportState::OverlayActive);
        assert_eq!(transport.federation.origin(), transport.server_name);

        let identity = transport.network.overlay().unwrap();
        identity.shutdown().await;
        assert_eq!(transport.network.state(), TransportState::Terminated);
    }

    #[tokio::test]
    async fn broken_overlay_config_is_fatal() {
        let server = ServerConfig {
            server_name: "p2p".to_string(),
            ..ServerConfig::default()
        };
        let overlay = OverlayConfig {
            listen_addresses: vec!["garbage".to_string()],
            ..loopback_overlay()
        };
        let http = reqwest::Client::new();
        let err = establish_transport(&server, &overlay, &key(), &http).unwrap_err();
        assert!(matches!(err, BootError::OverlayJoin(_)));
    }
}
