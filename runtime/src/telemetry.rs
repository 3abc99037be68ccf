//! Logging setup and the scoped tracing handle.
//!
//! Logging goes through a `tracing-subscriber` registry with an `EnvFilter`
//! and a `fmt` layer. Tracing is owned by a [`TracingHandle`] that the process
//! context keeps for its whole life and releases exactly once: on an explicit
//! [`TracingHandle::close`], or on drop if nobody closed it.

use plinth_core::config::{LogFormat, LoggingConfig, TracingConfig};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Errors setting up logging or tracing.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The filter directive did not parse
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter {
        /// The directive
        filter: String,
        /// Parser message
        reason: String,
    },

    /// The tracing service name was empty
    #[error("Tracing service name must not be empty")]
    EmptyServiceName,
}

/// Install the global log subscriber.
///
/// `RUST_LOG` overrides `config.filter`. If a global subscriber is already set
/// (a second context in the same process, or a test harness), the existing
/// one is kept and a warning is logged.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] if neither `RUST_LOG` nor the configured
/// filter parses.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.filter).map_err(|e| TelemetryError::Filter {
            filter: config.filter.clone(),
            reason: e.to_string(),
        })
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };

    if installed.is_err() {
        tracing::warn!("Global log subscriber already set, keeping the existing one");
    }
    Ok(())
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Scoped ownership of the process's tracing pipeline.
pub struct TracingHandle {
    service_name: String,
    enabled: bool,
    closed: AtomicBool,
    release: Mutex<Option<ReleaseFn>>,
}

impl fmt::Debug for TracingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingHandle")
            .field("service_name", &self.service_name)
            .field("enabled", &self.enabled)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl TracingHandle {
    /// Start tracing for a component.
    ///
    /// The service name is `config.service_name_prefix` followed by the
    /// component name.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::EmptyServiceName`] if the component name is empty.
    pub fn start(config: &TracingConfig, component: &str) -> Result<Self, TelemetryError> {
        if component.trim().is_empty() {
            return Err(TelemetryError::EmptyServiceName);
        }
        let service_name = format!("{}{component}", config.service_name_prefix);

        if config.enabled {
            tracing::info!(service = %service_name, "Tracing started");
        } else {
            tracing::debug!(service = %service_name, "Span export disabled");
        }

        let release_name = service_name.clone();
        Ok(Self {
            service_name,
            enabled: config.enabled,
            closed: AtomicBool::new(false),
            release: Mutex::new(Some(Box::new(move || {
                tracing::debug!(service = %release_name, "Tracing released");
            }))),
        })
    }

    /// A handle with a custom release action, for embedding an exporter.
    #[must_use]
    pub fn with_release(
        service_name: impl Into<String>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            enabled: true,
            closed: AtomicBool::new(false),
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// Service name spans are reported under.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Whether spans are exported.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the handle has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release tracing. Returns `true` if this call did the release.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let release = match self.release.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(release) = release {
            release();
        }
        true
    }
}

impl Drop for TracingHandle {
    fn drop(&mut self) {
        self.close();
    }
}
