//! Combined network behaviour and overlay settings.

use crate::error::OverlayError;
use crate::protocol::{
    FEDERATION_PROTOCOL, KAD_PROTOCOL, OverlayRequest, OverlayResponse, SERVICE_TAG,
};
use libp2p::identity::Keypair;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::{self, ProtocolSupport};
use libp2p::swarm::NetworkBehaviour;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::{Multiaddr, PeerId, identify, kad, mdns, relay};
use plinth_core::config::OverlayConfig;
use std::time::Duration;

/// Combined behaviour of an overlay node.
///
/// The derive generates `PlinthBehaviourEvent` with one variant per field.
#[derive(NetworkBehaviour)]
pub struct PlinthBehaviour {
    /// Relay client, used to listen through relays when not directly reachable
    pub relay_client: relay::client::Behaviour,
    /// Kademlia DHT
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    /// Peer metadata exchange
    pub identify: identify::Behaviour,
    /// Local multicast discovery, absent when disabled
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    /// Federation tunnel
    pub federation: request_response::cbor::Behaviour<OverlayRequest, OverlayResponse>,
}

/// Parsed overlay settings.
#[derive(Clone, Debug)]
pub struct OverlaySettings {
    /// Addresses to listen on
    pub listen_addresses: Vec<Multiaddr>,
    /// DHT seed peers
    pub bootstrap_peers: Vec<(PeerId, Multiaddr)>,
    /// Run multicast discovery
    pub enable_mdns: bool,
    /// Multicast query interval
    pub mdns_query_interval: Duration,
    /// Maximum relay reservations held at once
    pub max_relays: usize,
    /// Interval between DHT bootstrap rounds
    pub dht_bootstrap_interval: Duration,
    /// Idle connection timeout
    pub idle_connection_timeout: Duration,
    /// Tunnelled request timeout
    pub request_timeout: Duration,
}

impl OverlaySettings {
    /// Parse the overlay section of the process config.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Address`] for an unparseable multiaddr or a
    /// bootstrap address without a `/p2p/<peer id>` suffix.
    pub fn from_config(config: &OverlayConfig) -> Result<Self, OverlayError> {
        let listen_addresses = config
            .listen_addresses
            .iter()
            .map(String::as_str)
            .map(parse_multiaddr)
            .collect::<Result<Vec<_>, _>>()?;

        let bootstrap_peers = config
            .bootstrap_peers
            .iter()
            .map(|a| {
                let address = parse_multiaddr(a)?;
                let peer = peer_id_of(&address).ok_or_else(|| OverlayError::Address {
                    address: a.clone(),
                    reason: "missing /p2p/<peer id> component".to_string(),
                })?;
                Ok((peer, address))
            })
            .collect::<Result<Vec<_>, OverlayError>>()?;

        Ok(Self {
            listen_addresses,
            bootstrap_peers,
            enable_mdns: config.enable_mdns,
            mdns_query_interval: Duration::from_secs(config.mdns_query_interval_secs.max(1)),
            max_relays: config.max_relays,
            dht_bootstrap_interval: Duration::from_secs(config.dht_bootstrap_interval_secs.max(1)),
            idle_connection_timeout: Duration::from_secs(config.idle_connection_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        })
    }
}

fn parse_multiaddr(address: &str) -> Result<Multiaddr, OverlayError> {
    address.parse().map_err(|e: libp2p::multiaddr::Error| OverlayError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// The `/p2p/<peer id>` component of an address, if any.
#[must_use]
pub fn peer_id_of(address: &Multiaddr) -> Option<PeerId> {
    address.iter().find_map(|proto| match proto {
        Protocol::P2p(peer) => Some(peer),
        _ => None,
    })
}

/// Whether an address already goes through a relay.
#[must_use]
pub fn is_relayed(address: &Multiaddr) -> bool {
    address.iter().any(|proto| matches!(proto, Protocol::P2pCircuit))
}

/// Build the behaviour for a node.
///
/// # Errors
///
/// Returns [`OverlayError::Transport`] if multicast discovery cannot bind.
pub fn build_behaviour(
    key: &Keypair,
    relay_client: relay::client::Behaviour,
    settings: &OverlaySettings,
) -> Result<PlinthBehaviour, OverlayError> {
    let local_peer_id = key.public().to_peer_id();

    let mut kad_config = kad::Config::new(KAD_PROTOCOL);
    kad_config.set_query_timeout(Duration::from_secs(60));
    let mut kademlia = kad::Behaviour::with_config(
        local_peer_id,
        kad::store::MemoryStore::new(local_peer_id),
        kad_config,
    );
    kademlia.set_mode(Some(kad::Mode::Server));

    let identify = identify::Behaviour::new(
        identify::Config::new(SERVICE_TAG.to_string(), key.public())
            .with_agent_version(format!("plinth/{}", env!("CARGO_PKG_VERSION"))),
    );

    let mdns = if settings.enable_mdns {
        let config = mdns::Config {
            query_interval: settings.mdns_query_interval,
            ..mdns::Config::default()
        };
        Some(
            mdns::tokio::Behaviour::new(config, local_peer_id)
                .map_err(|e| OverlayError::Transport(format!("mDNS: {e}")))?,
        )
    } else {
        None
    };

    let federation = request_response::cbor::Behaviour::new(
        [(FEDERATION_PROTOCOL, ProtocolSupport::Full)],
        request_response::Config::default().with_request_timeout(settings.request_timeout),
    );

    Ok(PlinthBehaviour {
        relay_client,
        kademlia,
        identify,
        mdns: Toggle::from(mdns),
        federation,
    })
}
