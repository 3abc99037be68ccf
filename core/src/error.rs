//! Startup error taxonomy.
//!
//! Everything that can go wrong while a component process assembles its
//! runtime is a [`BootError`], and every [`BootError`] is fatal: the process
//! cannot do useful work without its bus, transport or listener. The only
//! best-effort failures are individual peer connection attempts made by
//! overlay discovery, which are logged and counted but never surface here.
//!
//! Callers choose what "fatal" means. Production entry points call
//! [`BootError::exit`]; test harnesses keep the `Result` and assert on it.

use crate::config::ConfigError;
use crate::event_bus::EventBusError;
use crate::keys::KeyError;
use thiserror::Error;

/// How a failure affects the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The process must not continue
    Fatal,
    /// Logged and counted, the operation is abandoned
    BestEffort,
}

/// Failures while constructing or serving a component process.
#[derive(Error, Debug)]
pub enum BootError {
    /// Configuration was missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signing key could not be loaded or decoded
    #[error("Signing key error: {0}")]
    SigningKey(String),

    /// Tracing could not be initialised
    #[error("Failed to start tracing: {0}")]
    Tracing(String),

    /// Event bus backend could not be reached or created
    #[error("Failed to set up event bus: {0}")]
    EventBus(String),

    /// Overlay identity derivation or network join failed
    #[error("Failed to join overlay network: {0}")]
    OverlayJoin(String),

    /// A relational store could not be opened
    #[error("Failed to connect to {store} store: {reason}")]
    StoreConnection {
        /// Which store
        store: &'static str,
        /// Why it failed
        reason: String,
    },

    /// The HTTP listener failed
    #[error("Failed to serve on {address}: {reason}")]
    Serve {
        /// Address that was bound
        address: String,
        /// Why it failed
        reason: String,
    },

    /// `serve` was called twice on the same process
    #[error("API server already started for this process")]
    AlreadyServing,
}

impl BootError {
    /// Classification of this error. Always [`ErrorClass::Fatal`].
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        ErrorClass::Fatal
    }

    /// Log the error and terminate the process with a non-zero status.
    pub fn exit(self) -> ! {
        tracing::error!(error = %self, class = ?self.class(), "Fatal startup error, exiting");
        std::process::exit(1)
    }
}

impl From<ConfigError> for BootError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::SigningKey(e) => Self::SigningKey(e.to_string()),
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<KeyError> for BootError {
    fn from(err: KeyError) -> Self {
        Self::SigningKey(err.to_string())
    }
}

impl From<EventBusError> for BootError {
    fn from(err: EventBusError) -> Self {
        Self::EventBus(err.to_string())
    }
}
