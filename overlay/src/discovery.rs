//! Best-effort connection to discovered peers.
//!
//! Multicast discovery reports peers on the local network. Each report gets
//! exactly one connection attempt. Attempts run independently of each other
//! and of the listener; a failed attempt is logged at debug, counted, and
//! otherwise forgotten. Nothing an attempt does can stop the listener.
//!
//! ```text
//!   mDNS ──► DiscoveredPeer ──► DiscoveryListener ──spawn──► connect()
//!                                       │                       │
//!                                 cancel token              DiscoveryStats
//! ```

use crate::error::OverlayError;
use libp2p::{Multiaddr, PeerId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A peer announced by local discovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Announced peer
    pub peer_id: PeerId,
    /// Address it announced
    pub address: Multiaddr,
}

/// Something that can open a connection to a discovered peer.
pub trait PeerConnector: Send + Sync + 'static {
    /// Attempt one connection.
    ///
    /// # Errors
    ///
    /// Returns an [`OverlayError`] if the connection cannot be established.
    fn connect(
        &self,
        peer: DiscoveredPeer,
    ) -> Pin<Box<dyn Future<Output = Result<(), OverlayError>> + Send + '_>>;
}

/// Counters of discovery connection attempts.
#[derive(Debug, Default)]
pub struct DiscoveryStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl DiscoveryStats {
    /// Attempts started.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Attempts that connected.
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Attempts that failed.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Consumes discovery reports and connects to each peer once.
pub struct DiscoveryListener<C: PeerConnector> {
    connector: Arc<C>,
    stats: Arc<DiscoveryStats>,
    token: CancellationToken,
}

impl<C: PeerConnector> DiscoveryListener<C> {
    /// Create a listener stopped by `token`.
    #[must_use]
    pub fn new(connector: C, token: CancellationToken) -> Self {
        Self {
            connector: Arc::new(connector),
            stats: Arc::new(DiscoveryStats::default()),
            token,
        }
    }

    /// Shared counters of this listener.
    #[must_use]
    pub fn stats(&self) -> Arc<DiscoveryStats> {
        Arc::clone(&self.stats)
    }

    /// Run until cancelled or until the report channel closes.
    ///
    /// Attempts still in flight when the listener stops are aborted.
    pub async fn run(self, mut discovered: mpsc::Receiver<DiscoveredPeer>) {
        let mut attempts = JoinSet::new();

        loop {
            tokio::select! {
                () = self.token.cancelled() => break,
                report = discovered.recv() => {
                    let Some(peer) = report else { break };
                    attempts.spawn(attempt(
                        Arc::clone(&self.connector),
                        Arc::clone(&self.stats),
                        peer,
                    ));
                }
                Some(_) = attempts.join_next(), if !attempts.is_empty() => {}
            }
        }

        attempts.abort_all();
        tracing::debug!(
            attempts = self.stats.attempts(),
            failures = self.stats.failures(),
            "Discovery listener stopped"
        );
    }
}

async fn attempt<C: PeerConnector>(
    connector: Arc<C>,
    stats: Arc<DiscoveryStats>,
    peer: DiscoveredPeer,
) {
    stats.attempts.fetch_add(1, Ordering::Relaxed);
    metrics::counter!("overlay_discovery_connect_attempts_total").increment(1);

    let peer_id = peer.peer_id;
    let address = peer.address.clone();
    match connector.connect(peer).await {
        Ok(()) => {
            stats.successes.fetch_add(1, Ordering::Relaxed);
            tracing::info!(%peer_id, %address, "Connected to discovered peer");
        }
        Err(e) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("overlay_discovery_connect_failures_total").increment(1);
            tracing::debug!(
                %peer_id,
                %address,
                error = %e,
                class = ?e.class(),
                "Discovery connection failed"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FailFirst {
        failures_left: AtomicU64,
    }

    impl PeerConnector for FailFirst {
        fn connect(
            &self,
            _peer: DiscoveredPeer,
        ) -> Pin<Box<dyn Future<Output = Result<(), OverlayError>> + Send + '_>> {
            Box::pin(async move {
                let left = self.failures_left.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                    Err(OverlayError::Dial("connection refused".to_string()))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn peer(n: u8) -> DiscoveredPeer {
        DiscoveredPeer {
            peer_id: crate::identity::peer_id_from_seed([n; 32]).unwrap(),
            address: "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
        }
    }

    async fn wait_for(stats: &DiscoveryStats, attempts: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while stats.successes() + stats.failures() < attempts {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("attempts did not finish");
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_listener() {
        let token = CancellationToken::new();
        let listener = DiscoveryListener::new(
            FailFirst {
                failures_left: AtomicU64::new(3),
            },
            token.clone(),
        );
        let stats = listener.stats();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(listener.run(rx));

        for n in 0..3 {
            tx.send(peer(n)).await.unwrap();
            wait_for(&stats, u64::from(n) + 1).await;
        }
        assert_eq!(stats.failures(), 3);

        tx.send(peer(3)).await.unwrap();
        wait_for(&stats, 4).await;
        assert_eq!(stats.successes(), 1);
        assert_eq!(stats.attempts(), 4);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("listener should stop on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn closed_channel_stops_the_listener() {
        let listener = DiscoveryListener::new(
            FailFirst {
                failures_left: AtomicU64::new(0),
            },
            CancellationToken::new(),
        );
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), listener.run(rx))
            .await
            .expect("listener should stop when reports end");
    }
}
