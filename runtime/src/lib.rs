//! # Plinth Runtime
//!
//! Ambient runtime for component processes:
//!
//! - [`telemetry`]: log subscriber setup and the scoped [`TracingHandle`]
//! - [`metrics`]: the process-wide Prometheus registry

pub mod metrics;
pub mod telemetry;

pub use metrics::{MetricsError, prometheus_handle};
pub use metrics_exporter_prometheus::PrometheusHandle;
pub use telemetry::{TelemetryError, TracingHandle, init_logging};
