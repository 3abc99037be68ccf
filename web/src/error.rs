//! API server errors.

use thiserror::Error;

/// Errors that end an API server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServeError {
    /// The listen socket could not be bound
    #[error("Failed to bind {address}: {reason}")]
    Bind {
        /// Address that was bound
        address: String,
        /// OS error message
        reason: String,
    },

    /// The accept loop failed
    #[error("Server on {address} failed: {reason}")]
    Serve {
        /// Address the server was listening on
        address: String,
        /// Error message
        reason: String,
    },
}

impl ServeError {
    /// Address the failing server was bound to.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Bind { address, .. } | Self::Serve { address, .. } => address,
        }
    }
}
