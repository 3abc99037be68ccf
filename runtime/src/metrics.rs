//! Prometheus metrics for component processes.
//!
//! A process has one recorder. [`prometheus_handle`] installs it the first
//! time it is called and hands out clones of the same handle afterwards, so
//! several contexts in one process (tests, mostly) share one registry.
//!
//! # Example
//!
//! ```rust,no_run
//! use plinth_runtime::metrics::prometheus_handle;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = prometheus_handle()?;
//! let body = handle.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL: Mutex<()> = Mutex::new(());

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Get the process-wide Prometheus handle, installing the recorder on first use.
///
/// If some other recorder is already installed, a detached registry is used
/// instead and a warning is logged; `/metrics` then renders only descriptions.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built.
pub fn prometheus_handle() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let _guard = INSTALL.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?;

    // Descriptions go to whichever recorder is current, so they are
    // registered only once the recorder behind the handle is in place.
    let recorder = builder.build_recorder();
    let handle = recorder.handle();
    match metrics::set_global_recorder(recorder) {
        Ok(()) => {
            register_metrics();
            tracing::info!("Prometheus metrics recorder installed");
        }
        Err(e) => {
            tracing::warn!("Metrics recorder already initialized, using a detached registry");
            let detached = e.into_inner();
            metrics::with_local_recorder(&detached, register_metrics);
        }
    }

    Ok(HANDLE.get_or_init(|| handle).clone())
}

/// Register all metric descriptions.
fn register_metrics() {
    // Event Bus Metrics
    describe_counter!(
        "event_bus_records_published_total",
        "Total number of records published to the event bus"
    );
    describe_counter!(
        "event_bus_records_consumed_total",
        "Total number of records consumed from the event bus"
    );
    describe_counter!(
        "event_bus_publish_errors_total",
        "Total number of event bus publish errors"
    );

    // Overlay Metrics
    describe_counter!(
        "overlay_discovery_connect_attempts_total",
        "Total number of connection attempts to discovered peers"
    );
    describe_counter!(
        "overlay_discovery_connect_failures_total",
        "Total number of failed connection attempts to discovered peers"
    );
    describe_counter!(
        "overlay_relay_reservations_total",
        "Total number of relay reservations accepted"
    );
    describe_gauge!(
        "overlay_connected_peers",
        "Number of peers currently connected on the overlay"
    );

    // Inter-component Metrics
    describe_counter!(
        "internal_api_requests_total",
        "Total number of requests to sibling components"
    );
    describe_counter!(
        "internal_api_errors_total",
        "Total number of failed requests to sibling components"
    );
    describe_histogram!(
        "internal_api_request_duration_seconds",
        "Time taken by requests to sibling components"
    );

    // Federation Metrics
    describe_counter!(
        "federation_requests_total",
        "Total number of outbound federation requests"
    );
}

/// Inter-component request metrics recorder.
pub struct InternalApiMetrics;

impl InternalApiMetrics {
    /// Record one request to a sibling component.
    pub fn record_request(component: &'static str, duration: Duration, success: bool) {
        counter!("internal_api_requests_total", "component" => component).increment(1);
        if !success {
            counter!("internal_api_errors_total", "component" => component).increment(1);
        }
        histogram!("internal_api_request_duration_seconds", "component" => component)
            .record(duration.as_secs_f64());
    }
}
