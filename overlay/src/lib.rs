//! # Plinth Overlay
//!
//! libp2p overlay network for servers that federate without DNS or TLS.
//!
//! A node's identity is its server signing key, so its peer ID doubles as its
//! server name. Nodes find each other through a Kademlia DHT seeded by
//! configured bootstrap peers and, on a local network, through mDNS. When a
//! node is not directly reachable it listens through relays advertised by
//! peers. Federation requests are tunnelled over the `/matrix` protocol.
//!
//! ## Example
//!
//! ```ignore
//! use plinth_core::config::OverlayConfig;
//!
//! let identity = plinth_overlay::join(&OverlayConfig::default(), seed)?;
//! println!("server name: {}", identity.server_name());
//! // ...
//! identity.shutdown().await;
//! ```

pub mod behaviour;
pub mod discovery;
pub mod error;
pub mod host;
pub mod identity;
pub mod protocol;

pub use behaviour::OverlaySettings;
pub use discovery::{DiscoveredPeer, DiscoveryListener, DiscoveryStats, PeerConnector};
pub use error::OverlayError;
pub use host::OverlayHandle;
pub use libp2p::{Multiaddr, PeerId};
pub use protocol::{InboundRequest, OverlayRequest, OverlayResponse, SERVICE_TAG};

use behaviour::{PlinthBehaviour, build_behaviour};
use host::HostTask;
use libp2p::{SwarmBuilder, noise, tcp, yamux};
use plinth_core::config::OverlayConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type BehaviourError = Box<dyn std::error::Error + Send + Sync>;

/// A joined overlay node.
///
/// Owns the host and discovery tasks. [`OverlayIdentity::cancel`] stops them;
/// dropping the identity does not.
#[derive(Debug)]
pub struct OverlayIdentity {
    peer_id: PeerId,
    handle: OverlayHandle,
    token: CancellationToken,
    cancelled: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<DiscoveryStats>,
    inbound: Mutex<Option<mpsc::Receiver<InboundRequest>>>,
    inbound_taken: Arc<AtomicBool>,
}

impl OverlayIdentity {
    /// Peer ID of this node.
    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Server name of this node: its textual peer ID.
    #[must_use]
    pub fn server_name(&self) -> String {
        self.peer_id.to_string()
    }

    /// Handle for dialing peers and sending requests.
    #[must_use]
    pub fn handle(&self) -> OverlayHandle {
        self.handle.clone()
    }

    /// Counters of discovery connection attempts.
    #[must_use]
    pub fn discovery_stats(&self) -> Arc<DiscoveryStats> {
        Arc::clone(&self.stats)
    }

    /// Take the stream of inbound federation requests.
    ///
    /// Returns `None` after the first call. Until someone takes it, inbound
    /// requests are answered with 503 straight away; afterwards they queue and
    /// are refused only while the queue is full.
    pub fn take_inbound_requests(&self) -> Option<mpsc::Receiver<InboundRequest>> {
        let receiver = self.inbound.lock().ok().and_then(|mut inbound| inbound.take());
        if receiver.is_some() {
            self.inbound_taken.store(true, Ordering::Release);
        }
        receiver
    }

    /// Stop the overlay tasks.
    ///
    /// Returns `true` on the call that actually cancelled, `false` afterwards.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        tracing::info!(peer_id = %self.peer_id, "Overlay cancelled");
        true
    }

    /// Whether [`cancel`](Self::cancel) has run.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel and wait for the overlay tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel();
        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Overlay task ended abnormally");
            }
        }
    }
}

/// Join the overlay.
///
/// Derives the node identity from `seed`, builds the swarm, binds every
/// configured listen address and starts the host and discovery tasks. Must be
/// called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an [`OverlayError`] if the identity, a configured address, the
/// transport stack or a listen address fails. Nothing is left running on
/// error.
pub fn join(config: &OverlayConfig, seed: [u8; 32]) -> Result<OverlayIdentity, OverlayError> {
    let keypair = identity::keypair_from_seed(seed)?;
    let peer_id = keypair.public().to_peer_id();
    let settings = OverlaySettings::from_config(config)?;

    let mut swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| OverlayError::Transport(e.to_string()))?
        .with_quic()
        .with_dns()
        .map_err(|e| OverlayError::Transport(e.to_string()))?
        .with_relay_client(noise::Config::new, yamux::Config::default)
        .map_err(|e| OverlayError::Transport(e.to_string()))?
        .with_behaviour(|key, relay_client| -> Result<PlinthBehaviour, BehaviourError> {
            Ok(build_behaviour(key, relay_client, &settings)?)
        })
        .map_err(|e| OverlayError::Transport(e.to_string()))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(settings.idle_connection_timeout))
        .build();

    for address in &settings.listen_addresses {
        swarm
            .listen_on(address.clone())
            .map_err(|e| OverlayError::Listen {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
    }

    for (peer, address) in &settings.bootstrap_peers {
        swarm
            .behaviour_mut()
            .kademlia
            .add_address(peer, address.clone());
        tracing::debug!(%peer, %address, "Added bootstrap peer");
    }

    let token = CancellationToken::new();
    let parts = HostTask::create(
        swarm,
        settings.dht_bootstrap_interval,
        settings.max_relays,
        token.child_token(),
    );

    let listener = DiscoveryListener::new(parts.handle.clone(), token.child_token());
    let stats = listener.stats();

    let tasks = vec![
        tokio::spawn(parts.task.run()),
        tokio::spawn(listener.run(parts.discovered)),
    ];

    tracing::info!(
        %peer_id,
        mdns = settings.enable_mdns,
        bootstrap_peers = settings.bootstrap_peers.len(),
        "Joined overlay network"
    );

    Ok(OverlayIdentity {
        peer_id,
        handle: parts.handle,
        token,
        cancelled: AtomicBool::new(false),
        tasks: Mutex::new(tasks),
        stats,
        inbound: Mutex::new(Some(parts.inbound)),
        inbound_taken: parts.inbound_taken,
    })
}
