//! The swarm host task and its handle.
//!
//! The swarm is owned by one task. Everything else talks to it through an
//! [`OverlayHandle`], which sends commands over a channel and waits for the
//! reply on a oneshot. Discovery reports and inbound federation requests flow
//! the other way over bounded channels.

use crate::behaviour::{PlinthBehaviour, PlinthBehaviourEvent, is_relayed};
use crate::discovery::{DiscoveredPeer, PeerConnector};
use crate::error::OverlayError;
use crate::protocol::{InboundRequest, OverlayRequest, OverlayResponse, SERVICE_TAG};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use libp2p::multiaddr::Protocol;
use libp2p::request_response::{self, OutboundRequestId, ResponseChannel};
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{ConnectionId, DialError, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identify, mdns, relay};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 64;
const DISCOVERY_BUFFER: usize = 128;
const INBOUND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, OverlayError>>;
type PendingResponse =
    BoxFuture<'static, (ResponseChannel<OverlayResponse>, Option<OverlayResponse>)>;

enum Command {
    Dial {
        peer: PeerId,
        address: Multiaddr,
        reply: Reply<()>,
    },
    Request {
        peer: PeerId,
        request: OverlayRequest,
        reply: Reply<OverlayResponse>,
    },
    ListenAddresses {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    ConnectedPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
}

/// Cloneable handle to a running overlay host.
#[derive(Clone, Debug)]
pub struct OverlayHandle {
    local_peer_id: PeerId,
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dial { peer, .. } => write!(f, "Dial({peer})"),
            Self::Request { peer, .. } => write!(f, "Request({peer})"),
            Self::ListenAddresses { .. } => f.write_str("ListenAddresses"),
            Self::ConnectedPeers { .. } => f.write_str("ConnectedPeers"),
        }
    }
}

impl OverlayHandle {
    /// Peer ID of the local node.
    #[must_use]
    pub const fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Connect to a peer at a known address.
    ///
    /// Succeeds immediately if already connected.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Dial`] if the connection fails, or
    /// [`OverlayError::Stopped`] if the host is gone.
    pub async fn dial(&self, peer: PeerId, address: Multiaddr) -> Result<(), OverlayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Dial {
            peer,
            address,
            reply,
        })
        .await?;
        rx.await.map_err(|_| OverlayError::Stopped)?
    }

    /// Send a federation request to a peer and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Request`] on timeout, unreachable peer or
    /// protocol failure, or [`OverlayError::Stopped`] if the host is gone.
    pub async fn send_request(
        &self,
        peer: PeerId,
        request: OverlayRequest,
    ) -> Result<OverlayResponse, OverlayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Request {
            peer,
            request,
            reply,
        })
        .await?;
        rx.await.map_err(|_| OverlayError::Stopped)?
    }

    /// Addresses the node is currently listening on.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Stopped`] if the host is gone.
    pub async fn listen_addresses(&self) -> Result<Vec<Multiaddr>, OverlayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ListenAddresses { reply }).await?;
        rx.await.map_err(|_| OverlayError::Stopped)
    }

    /// Peers with at least one open connection.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Stopped`] if the host is gone.
    pub async fn connected_peers(&self) -> Result<Vec<PeerId>, OverlayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ConnectedPeers { reply }).await?;
        rx.await.map_err(|_| OverlayError::Stopped)
    }

    async fn send(&self, command: Command) -> Result<(), OverlayError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| OverlayError::Stopped)
    }
}

impl PeerConnector for OverlayHandle {
    fn connect(
        &self,
        peer: DiscoveredPeer,
    ) -> Pin<Box<dyn Future<Output = Result<(), OverlayError>> + Send + '_>> {
        Box::pin(async move {
            self.dial(peer.peer_id, peer.address).await?;
            if let Ok(peers) = self.connected_peers().await {
                tracing::info!(known_peers = peers.len(), "Overlay peer set changed");
            }
            Ok(())
        })
    }
}

/// Channels produced when a host is created.
pub(crate) struct HostParts {
    pub(crate) task: HostTask,
    pub(crate) handle: OverlayHandle,
    pub(crate) discovered: mpsc::Receiver<DiscoveredPeer>,
    pub(crate) inbound: mpsc::Receiver<InboundRequest>,
    /// Set once the inbound receiver has been handed out
    pub(crate) inbound_taken: Arc<AtomicBool>,
}

/// Owns the swarm and drives it until cancelled.
pub(crate) struct HostTask {
    swarm: Swarm<PlinthBehaviour>,
    commands: mpsc::Receiver<Command>,
    discovered: mpsc::Sender<DiscoveredPeer>,
    inbound: mpsc::Sender<InboundRequest>,
    inbound_taken: Arc<AtomicBool>,
    token: CancellationToken,
    bootstrap_interval: Duration,
    max_relays: usize,
    relays: HashSet<PeerId>,
    pending_dials: HashMap<ConnectionId, Reply<()>>,
    pending_requests: HashMap<OutboundRequestId, Reply<OverlayResponse>>,
    pending_responses: FuturesUnordered<PendingResponse>,
}

impl HostTask {
    pub(crate) fn create(
        swarm: Swarm<PlinthBehaviour>,
        bootstrap_interval: Duration,
        max_relays: usize,
        token: CancellationToken,
    ) -> HostParts {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (discovered_tx, discovered_rx) = mpsc::channel(DISCOVERY_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let inbound_taken = Arc::new(AtomicBool::new(false));

        let handle = OverlayHandle {
            local_peer_id: *swarm.local_peer_id(),
            commands: command_tx,
        };

        let task = Self {
            swarm,
            commands: command_rx,
            discovered: discovered_tx,
            inbound: inbound_tx,
            inbound_taken: Arc::clone(&inbound_taken),
            token,
            bootstrap_interval,
            max_relays,
            relays: HashSet::new(),
            pending_dials: HashMap::new(),
            pending_requests: HashMap::new(),
            pending_responses: FuturesUnordered::new(),
        };

        HostParts {
            task,
            handle,
            discovered: discovered_rx,
            inbound: inbound_rx,
            inbound_taken,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut bootstrap = tokio::time::interval(self.bootstrap_interval);
        bootstrap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.token.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = bootstrap.tick() => {
                    if let Err(e) = self.swarm.behaviour_mut().kademlia.bootstrap() {
                        tracing::debug!(error = ?e, "DHT bootstrap skipped");
                    }
                }
                Some((channel, response)) = self.pending_responses.next(),
                    if !self.pending_responses.is_empty() =>
                {
                    let response = response.unwrap_or_else(OverlayResponse::unavailable);
                    if self
                        .swarm
                        .behaviour_mut()
                        .federation
                        .send_response(channel, response)
                        .is_err()
                    {
                        tracing::debug!("Federation response dropped, stream already closed");
                    }
                }
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
            }
        }

        tracing::info!(peer_id = %self.swarm.local_peer_id(), "Overlay host stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial {
                peer,
                address,
                reply,
            } => {
                let opts = DialOpts::peer_id(peer).addresses(vec![address]).build();
                let connection_id = opts.connection_id();
                match self.swarm.dial(opts) {
                    Ok(()) => {
                        self.pending_dials.insert(connection_id, reply);
                    }
                    Err(DialError::DialPeerConditionFalse(_)) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(OverlayError::Dial(e.to_string())));
                    }
                }
            }
            Command::Request {
                peer,
                request,
                reply,
            } => {
                let request_id = self
                    .swarm
                    .behaviour_mut()
                    .federation
                    .send_request(&peer, request);
                self.pending_requests.insert(request_id, reply);
            }
            Command::ListenAddresses { reply } => {
                let _ = reply.send(self.swarm.listeners().cloned().collect());
            }
            Command::ConnectedPeers { reply } => {
                let _ = reply.send(self.swarm.connected_peers().copied().collect());
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<PlinthBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                let local = *self.swarm.local_peer_id();
                tracing::info!(address = %address.with(Protocol::P2p(local)), "Overlay listening");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                ..
            } => {
                tracing::debug!(%peer_id, "Overlay connection established");
                if let Some(reply) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Ok(()));
                }
                self.record_connected_peers();
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                tracing::debug!(%peer_id, "Overlay connection closed");
                self.relays.remove(&peer_id);
                self.record_connected_peers();
            }
            SwarmEvent::OutgoingConnectionError {
                connection_id,
                peer_id,
                error,
            } => {
                tracing::debug!(peer_id = ?peer_id, error = %error, "Overlay dial failed");
                if let Some(reply) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Err(OverlayError::Dial(error.to_string())));
                }
            }
            SwarmEvent::Behaviour(event) => self.handle_behaviour_event(event),
            _ => {}
        }
    }

    fn handle_behaviour_event(&mut self, event: PlinthBehaviourEvent) {
        match event {
            PlinthBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. }) => {
                self.on_identified(peer_id, info);
            }
            PlinthBehaviourEvent::Mdns(mdns::Event::Discovered(peers)) => {
                for (peer_id, address) in peers {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, address.clone());
                    if self
                        .discovered
                        .try_send(DiscoveredPeer { peer_id, address })
                        .is_err()
                    {
                        tracing::debug!(%peer_id, "Discovery report dropped, listener busy");
                    }
                }
            }
            PlinthBehaviourEvent::Federation(event) => self.on_federation(event),
            PlinthBehaviourEvent::RelayClient(
                relay::client::Event::ReservationReqAccepted { relay_peer_id, .. },
            ) => {
                metrics::counter!("overlay_relay_reservations_total").increment(1);
                tracing::info!(relay = %relay_peer_id, "Relay reservation accepted");
            }
            _ => {}
        }
    }

    fn on_identified(&mut self, peer_id: PeerId, info: identify::Info) {
        if info.protocol_version != SERVICE_TAG {
            tracing::debug!(
                %peer_id,
                tag = %info.protocol_version,
                "Ignoring peer from a different overlay"
            );
            return;
        }

        for address in &info.listen_addrs {
            self.swarm
                .behaviour_mut()
                .kademlia
                .add_address(&peer_id, address.clone());
        }

        let offers_relay = info.protocols.contains(&relay::HOP_PROTOCOL_NAME);
        if !offers_relay || self.relays.len() >= self.max_relays || self.relays.contains(&peer_id) {
            return;
        }

        let Some(direct) = info.listen_addrs.iter().find(|a| !is_relayed(a)) else {
            return;
        };
        let circuit = direct
            .clone()
            .with(Protocol::P2p(peer_id))
            .with(Protocol::P2pCircuit);
        match self.swarm.listen_on(circuit.clone()) {
            Ok(_) => {
                self.relays.insert(peer_id);
                tracing::info!(
                    relay = %peer_id,
                    address = %circuit,
                    "Requesting relay reservation"
                );
            }
            Err(e) => tracing::debug!(relay = %peer_id, error = %e, "Relay listen failed"),
        }
    }

    fn on_federation(&mut self, event: request_response::Event<OverlayRequest, OverlayResponse>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    metrics::counter!("federation_requests_total", "direction" => "inbound")
                        .increment(1);
                    if !self.inbound_taken.load(Ordering::Acquire) {
                        tracing::debug!(%peer, "No inbound federation handler, refusing request");
                        let _ = self
                            .swarm
                            .behaviour_mut()
                            .federation
                            .send_response(channel, OverlayResponse::unavailable());
                        return;
                    }
                    let (reply, rx) = oneshot::channel();
                    match self.inbound.try_send(InboundRequest::new(peer, request, reply)) {
                        Ok(()) => self
                            .pending_responses
                            .push(async move { (channel, rx.await.ok()) }.boxed()),
                        Err(_) => {
                            tracing::warn!(
                                %peer,
                                "Inbound federation queue unavailable, refusing request"
                            );
                            let _ = self
                                .swarm
                                .behaviour_mut()
                                .federation
                                .send_response(channel, OverlayResponse::unavailable());
                        }
                    }
                }
                request_response::Message::Response {
                    request_id,
                    response,
                } => {
                    if let Some(reply) = self.pending_requests.remove(&request_id) {
                        let _ = reply.send(Ok(response));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                tracing::debug!(%peer, error = %error, "Federation request failed");
                if let Some(reply) = self.pending_requests.remove(&request_id) {
                    let _ = reply.send(Err(OverlayError::Request(error.to_string())));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                tracing::debug!(%peer, error = %error, "Inbound federation request failed");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_connected_peers(&self) {
        metrics::gauge!("overlay_connected_peers").set(self.swarm.connected_peers().count() as f64);
    }
}
