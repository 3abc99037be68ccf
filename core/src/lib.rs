//! # Plinth Core
//!
//! Shared building blocks for every Plinth component process.
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration model and validation
//! - [`keys`]: the server's ed25519 signing key
//! - [`event_bus`]: [`Producer`](event_bus::Producer) and
//!   [`Consumer`](event_bus::Consumer) capabilities
//! - [`embedded_log`]: single-writer ordered log over a pluggable storage
//! - [`error`]: the startup error taxonomy
//!
//! Concrete backends live in sibling crates: `plinth-postgres` supplies the
//! embedded log's durable storage and `plinth-redpanda` the external cluster.

pub mod config;
pub mod embedded_log;
pub mod error;
pub mod event_bus;
pub mod keys;

pub use config::{Config, ConfigError};
pub use embedded_log::{EmbeddedLog, LogStorage, StoredRecord};
pub use error::{BootError, ErrorClass};
pub use event_bus::{
    ConsumedRecord, Consumer, DeliverySemantics, EventBusError, OutgoingRecord, Producer,
    RecordStream, StartOffset,
};
pub use keys::{KeyError, SigningKeyMaterial};
