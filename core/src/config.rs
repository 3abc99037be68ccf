//! Process configuration.
//!
//! Every component process reads the same TOML file. Sections that a component
//! does not use are still validated so a broken file fails every process the
//! same way.
//!
//! ```toml
//! [server]
//! server_name = "example.org"   # "p2p" selects overlay mode
//! private_key_path = "matrix_key.pem"
//!
//! [event_bus]
//! use_embedded_log = true
//!
//! [database]
//! embedded_log = "postgres://dendrite@localhost/eventlog"
//! ```

use crate::keys::{KeyError, SigningKeyMaterial};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Server name that selects overlay networking instead of DNS-named federation.
pub const OVERLAY_SERVER_NAME: &str = "p2p";

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file was not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A field failed validation
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        /// Dotted field path
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Signing key could not be loaded
    #[error("Signing key: {0}")]
    SigningKey(#[from] KeyError),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server identity
    pub server: ServerConfig,
    /// Event bus backend selection
    pub event_bus: EventBusConfig,
    /// Relational store connection strings
    pub database: DatabaseConfig,
    /// Listen addresses of sibling components
    pub listen: ListenConfig,
    /// Overlay networking, used only when `server.server_name` is `"p2p"`
    pub overlay: OverlayConfig,
    /// Log output
    pub logging: LoggingConfig,
    /// Distributed tracing
    pub tracing: TracingConfig,
}

/// Server identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Public server name, or `"p2p"` for overlay mode
    pub server_name: String,
    /// Key ID to publish the signing key under, if the PEM file has none
    pub key_id: Option<String>,
    /// Path to the PEM-encoded ed25519 signing key
    pub private_key_path: Option<PathBuf>,
    /// Key material supplied directly instead of from a file
    #[serde(skip)]
    pub signing_key: Option<SigningKeyMaterial>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            key_id: None,
            private_key_path: None,
            signing_key: None,
        }
    }
}

impl ServerConfig {
    /// Whether this server runs on the overlay network.
    #[must_use]
    pub fn is_overlay(&self) -> bool {
        self.server_name == OVERLAY_SERVER_NAME
    }

    /// Resolve the signing key, loading it from disk if it was not supplied directly.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if no key source is configured, or
    /// [`ConfigError::SigningKey`] if the key file is unusable.
    pub fn signing_key(&self) -> Result<SigningKeyMaterial, ConfigError> {
        if let Some(key) = &self.signing_key {
            return Ok(key.clone());
        }
        let path = self.private_key_path.as_deref().ok_or(ConfigError::Invalid {
            field: "server.private_key_path",
            reason: "no signing key configured".to_string(),
        })?;
        Ok(SigningKeyMaterial::load(path, self.key_id.as_deref())?)
    }
}

/// Event bus backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Use the embedded log over `database.embedded_log` instead of a broker cluster
    pub use_embedded_log: bool,
    /// Broker bootstrap addresses
    pub addresses: Vec<String>,
    /// How long to wait for the cluster to answer at startup
    pub connect_timeout_secs: u64,
    /// Topic names
    pub topics: TopicsConfig,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            use_embedded_log: false,
            addresses: Vec::new(),
            connect_timeout_secs: 10,
            topics: TopicsConfig::default(),
        }
    }
}

impl EventBusConfig {
    /// Startup connection timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Broker addresses joined for a bootstrap server list.
    #[must_use]
    pub fn bootstrap_servers(&self) -> String {
        self.addresses.join(",")
    }
}

/// Topic names shared by components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    /// Room server output events
    pub output_room_event: String,
    /// Client API account data updates
    pub output_client_data: String,
    /// Typing server output events
    pub output_typing_event: String,
    /// Profile updates
    pub user_updates: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            output_room_event: "roomserverOutput".to_string(),
            output_client_data: "clientapiOutput".to_string(),
            output_typing_event: "typingServerOutput".to_string(),
            user_updates: "userUpdates".to_string(),
        }
    }
}

/// Relational store connection strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backing store of the embedded log
    pub embedded_log: Option<String>,
    /// Device store
    pub device: Option<String>,
    /// Account store
    pub account: Option<String>,
    /// Server signing key store
    pub server_key: Option<String>,
    /// Pool size for each store
    pub max_connections: Option<u32>,
}

/// Listen addresses of sibling components, as `host:port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Application service gateway
    pub app_service_api: String,
    /// Room server
    pub room_server: String,
    /// Typing server
    pub typing_server: String,
    /// Federation sender
    pub federation_sender: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            app_service_api: "localhost:7777".to_string(),
            room_server: "localhost:7770".to_string(),
            typing_server: "localhost:7778".to_string(),
            federation_sender: "localhost:7776".to_string(),
        }
    }
}

impl ListenConfig {
    /// Base URL of the application service gateway.
    #[must_use]
    pub fn app_service_url(&self) -> String {
        http_url(&self.app_service_api)
    }

    /// Base URL of the room server.
    #[must_use]
    pub fn room_server_url(&self) -> String {
        http_url(&self.room_server)
    }

    /// Base URL of the typing server.
    #[must_use]
    pub fn typing_server_url(&self) -> String {
        http_url(&self.typing_server)
    }

    /// Base URL of the federation sender.
    #[must_use]
    pub fn federation_sender_url(&self) -> String {
        http_url(&self.federation_sender)
    }
}

fn http_url(address: &str) -> String {
    if address.contains("://") {
        address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", address.trim_end_matches('/'))
    }
}

/// Overlay networking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Multiaddrs to listen on
    pub listen_addresses: Vec<String>,
    /// Multiaddrs (with `/p2p/<peer id>`) to seed the DHT with
    pub bootstrap_peers: Vec<String>,
    /// Run local multicast discovery
    pub enable_mdns: bool,
    /// Multicast discovery query interval
    pub mdns_query_interval_secs: u64,
    /// Maximum relay reservations to hold at once
    pub max_relays: usize,
    /// Interval between DHT bootstrap rounds
    pub dht_bootstrap_interval_secs: u64,
    /// Close connections idle for longer than this
    pub idle_connection_timeout_secs: u64,
    /// Timeout for one tunnelled federation request
    pub request_timeout_secs: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            listen_addresses: vec![
                "/ip4/0.0.0.0/tcp/0".to_string(),
                "/ip4/0.0.0.0/udp/0/quic-v1".to_string(),
            ],
            bootstrap_peers: Vec::new(),
            enable_mdns: true,
            mdns_query_interval_secs: 10,
            max_relays: 2,
            dht_bootstrap_interval_secs: 300,
            idle_connection_timeout_secs: 60,
            request_timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Distributed tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Whether spans are exported
    pub enabled: bool,
    /// Prefix of the service name; the component name is appended
    pub service_name_prefix: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name_prefix: "plinth-".to_string(),
        }
    }
}

impl Config {
    /// Load and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Supply the signing key directly instead of reading `private_key_path`.
    #[must_use]
    pub fn with_signing_key(mut self, key: SigningKeyMaterial) -> Self {
        self.server.signing_key = Some(key);
        self
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.server_name.trim().is_empty() {
            return Err(invalid("server.server_name", "must not be empty"));
        }

        if self.event_bus.use_embedded_log {
            if self.database.embedded_log.as_deref().is_none_or(str::is_empty) {
                return Err(invalid(
                    "database.embedded_log",
                    "required when event_bus.use_embedded_log is set",
                ));
            }
        } else if self.event_bus.addresses.iter().all(|a| a.trim().is_empty()) {
            return Err(invalid(
                "event_bus.addresses",
                "at least one broker address is required",
            ));
        }

        if self.event_bus.connect_timeout_secs == 0 {
            return Err(invalid("event_bus.connect_timeout_secs", "must be positive"));
        }

        if self.server.is_overlay() {
            if self.overlay.listen_addresses.is_empty() {
                return Err(invalid("overlay.listen_addresses", "must not be empty"));
            }
            if self.overlay.mdns_query_interval_secs == 0
                || self.overlay.dht_bootstrap_interval_secs == 0
                || self.overlay.request_timeout_secs == 0
            {
                return Err(invalid("overlay", "intervals and timeouts must be positive"));
            }
        }

        if let Some(key_id) = &self.server.key_id {
            if !key_id.starts_with("ed25519:") {
                return Err(invalid("server.key_id", "must start with 'ed25519:'"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
