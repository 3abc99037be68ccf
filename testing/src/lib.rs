//! # Plinth Testing
//!
//! Test doubles and fixtures for Plinth components.
//!
//! This crate provides:
//! - [`InMemoryLogStorage`]: embedded log storage without a database
//! - [`ScriptedConnector`]: overlay peer connector with scripted outcomes
//! - Configuration fixtures for embedded, external and overlay setups
//!
//! ## Example
//!
//! ```ignore
//! use plinth_base::ProcessContext;
//! use plinth_testing::{InMemoryLogStorage, fixtures};
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_component_boot() {
//!     let config = fixtures::embedded_config("example.org");
//!     let context = ProcessContext::builder("roomserver", config)
//!         .with_log_storage(Arc::new(InMemoryLogStorage::new()))
//!         .build()
//!         .await
//!         .unwrap();
//!     assert_eq!(context.server_name(), "example.org");
//! }
//! ```

pub mod connector;
pub mod fixtures;
pub mod log_storage;

pub use connector::ScriptedConnector;
pub use log_storage::InMemoryLogStorage;
