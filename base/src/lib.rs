//! # Plinth Base
//!
//! Composition root of a component process.
//!
//! [`ProcessContext`] assembles, once per process:
//!
//! - an ordered [`EventBus`]: the embedded log or an external cluster
//! - a network identity and [`FederationClient`]: HTTPS under a DNS name, or
//!   the overlay under a peer ID when the server name is `"p2p"`
//! - typed clients for sibling components ([`clients`])
//! - an API server with CORS and `/metrics`
//!
//! and tears them down again with [`ProcessContext::shutdown`].

pub mod clients;
pub mod context;
pub mod event_bus;
pub mod federation;
pub mod transport;

pub use clients::ClientError;
pub use context::{ProcessContext, ProcessContextBuilder};
pub use event_bus::{EventBus, select_event_bus};
pub use federation::{FederationClient, FederationError, FederationTransport, Transaction};
pub use transport::{EstablishedTransport, Network, TransportState, establish_transport};
