//! Scripted overlay peer connector.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a test panic

use plinth_overlay::{DiscoveredPeer, OverlayError, PeerConnector};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// [`PeerConnector`] that replays a script of outcomes.
///
/// Each attempt takes the next scripted outcome; once the script runs out
/// every attempt succeeds. Attempted peers are recorded in order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<VecDeque<Result<(), OverlayError>>>>,
    attempts: Arc<Mutex<Vec<DiscoveredPeer>>>,
    delay: Option<Duration>,
}

impl ScriptedConnector {
    /// Connector whose attempts all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` attempts with a dial error.
    #[must_use]
    pub fn failing_first(n: usize) -> Self {
        let connector = Self::new();
        for attempt in 0..n {
            connector.push(Err(OverlayError::Dial(format!("scripted failure {attempt}"))));
        }
        connector
    }

    /// Hold every attempt for `delay` before resolving it.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue one more outcome.
    pub fn push(&self, outcome: Result<(), OverlayError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Peers attempted so far.
    #[must_use]
    pub fn attempts(&self) -> Vec<DiscoveredPeer> {
        self.attempts.lock().unwrap().clone()
    }
}

impl PeerConnector for ScriptedConnector {
    fn connect(
        &self,
        peer: DiscoveredPeer,
    ) -> Pin<Box<dyn Future<Output = Result<(), OverlayError>> + Send + '_>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.attempts.lock().unwrap().push(peer);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        })
    }
}
