//! `PostgreSQL` storage for Plinth.
//!
//! - [`PostgresLogStorage`]: durable storage behind the embedded event log
//! - [`stores`]: connection handles for the device, account and server key stores
//!
//! # Example
//!
//! ```ignore
//! use plinth_core::EmbeddedLog;
//! use plinth_postgres::PostgresLogStorage;
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = PostgresLogStorage::connect("postgres://localhost/eventlog").await?;
//!     let log = Arc::new(EmbeddedLog::new(Arc::new(storage)));
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod log_storage;
pub mod stores;

pub use log_storage::PostgresLogStorage;
pub use sqlx::PgPool;
pub use stores::{AccountStore, DeviceStore, ServerKeyStore, StoreError, connect_store};
