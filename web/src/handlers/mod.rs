//! Built-in HTTP handlers.

pub mod metrics;
