//! Configuration fixtures.
//!
//! Every fixture carries an in-memory signing key, so none of them touch the
//! filesystem.

#![allow(clippy::expect_used)] // Fixed seeds always produce a valid key

use plinth_core::config::OverlayConfig;
use plinth_core::{Config, SigningKeyMaterial};

/// Key ID used by every fixture key.
pub const TEST_KEY_ID: &str = "ed25519:test";

/// Placeholder embedded log URL; tests inject storage instead of connecting.
pub const UNUSED_DATABASE_URL: &str = "postgres://unused/embedded_log";

/// Deterministic signing key derived from `seed_byte`.
#[must_use]
pub fn signing_key(seed_byte: u8) -> SigningKeyMaterial {
    SigningKeyMaterial::from_seed(TEST_KEY_ID, [seed_byte; 32]).expect("fixed seed is valid")
}

/// Overlay settings that stay on loopback and never multicast.
#[must_use]
pub fn loopback_overlay() -> OverlayConfig {
    OverlayConfig {
        listen_addresses: vec!["/ip4/127.0.0.1/tcp/0".to_string()],
        enable_mdns: false,
        ..OverlayConfig::default()
    }
}

/// Embedded event log, conventional federation under `server_name`.
#[must_use]
pub fn embedded_config(server_name: &str) -> Config {
    let mut config = Config::default().with_signing_key(signing_key(1));
    config.server.server_name = server_name.to_string();
    config.event_bus.use_embedded_log = true;
    config.database.embedded_log = Some(UNUSED_DATABASE_URL.to_string());
    config.overlay = loopback_overlay();
    config
}

/// Embedded event log, overlay federation.
#[must_use]
pub fn overlay_config(seed_byte: u8) -> Config {
    let mut config = embedded_config("p2p").with_signing_key(signing_key(seed_byte));
    config.server.server_name = "p2p".to_string();
    config
}

/// External event bus at `addresses`, giving up after `timeout_secs`.
#[must_use]
pub fn external_config(server_name: &str, addresses: &[&str], timeout_secs: u64) -> Config {
    let mut config = embedded_config(server_name);
    config.event_bus.use_embedded_log = false;
    config.event_bus.addresses = addresses.iter().map(ToString::to_string).collect();
    config.event_bus.connect_timeout_secs = timeout_secs;
    config.database.embedded_log = None;
    config
}
