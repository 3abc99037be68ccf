//! Overlay errors.

use plinth_core::ErrorClass;
use thiserror::Error;

/// Errors raised by the overlay network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    /// The signing seed could not be turned into a libp2p identity
    #[error("Identity derivation failed: {0}")]
    Identity(String),

    /// A configured multiaddr did not parse
    #[error("Invalid multiaddr '{address}': {reason}")]
    Address {
        /// The offending address
        address: String,
        /// Parser message
        reason: String,
    },

    /// Transport or behaviour construction failed
    #[error("Transport setup failed: {0}")]
    Transport(String),

    /// Binding a listen address failed
    #[error("Failed to listen on {address}: {reason}")]
    Listen {
        /// Address that was bound
        address: String,
        /// Why it failed
        reason: String,
    },

    /// Connecting to a peer failed
    #[error("Dial failed: {0}")]
    Dial(String),

    /// A tunnelled request failed
    #[error("Request failed: {0}")]
    Request(String),

    /// The host task is no longer running
    #[error("Overlay host stopped")]
    Stopped,
}

impl OverlayError {
    /// Dials are best-effort; everything else stops the join.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Dial(_) | Self::Request(_) => ErrorClass::BestEffort,
            _ => ErrorClass::Fatal,
        }
    }
}
