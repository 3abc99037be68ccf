//! Connection handles for component stores.
//!
//! Components own their schemas. This module only opens the pools and tags
//! them with what the component needs to know about them.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use thiserror::Error;

/// Errors opening a component store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No connection string configured
    #[error("No connection string configured for the {0} store")]
    NotConfigured(&'static str),

    /// The database could not be reached
    #[error("Failed to connect to the {store} store: {reason}")]
    Connect {
        /// Which store
        store: &'static str,
        /// Why
        reason: String,
    },
}

impl StoreError {
    /// Name of the store this error is about.
    #[must_use]
    pub const fn store(&self) -> &'static str {
        match self {
            Self::NotConfigured(store) | Self::Connect { store, .. } => store,
        }
    }
}

/// Open a pool for the named store and check it answers.
///
/// # Errors
///
/// Returns [`StoreError`] if `url` is missing or the database is unreachable.
pub async fn connect_store(
    store: &'static str,
    url: Option<&str>,
    max_connections: Option<u32>,
) -> Result<PgPool, StoreError> {
    let url = url
        .filter(|u| !u.is_empty())
        .ok_or(StoreError::NotConfigured(store))?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections.unwrap_or(10))
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await
        .map_err(|e| StoreError::Connect {
            store,
            reason: e.to_string(),
        })?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Connect {
            store,
            reason: e.to_string(),
        })?;

    tracing::info!(store, "Store connection pool ready");
    Ok(pool)
}

/// Device store: access tokens and devices of local users.
#[derive(Clone, Debug)]
pub struct DeviceStore {
    pool: PgPool,
    server_name: String,
}

impl DeviceStore {
    /// Wrap a pool for the given local server name.
    #[must_use]
    pub fn new(pool: PgPool, server_name: impl Into<String>) -> Self {
        Self {
            pool,
            server_name: server_name.into(),
        }
    }

    /// Connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Server name local user IDs are qualified with.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

/// Account store: local user accounts and profiles.
#[derive(Clone, Debug)]
pub struct AccountStore {
    pool: PgPool,
    server_name: String,
}

impl AccountStore {
    /// Wrap a pool for the given local server name.
    #[must_use]
    pub fn new(pool: PgPool, server_name: impl Into<String>) -> Self {
        Self {
            pool,
            server_name: server_name.into(),
        }
    }

    /// Connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Server name local user IDs are qualified with.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Qualify a localpart with this server's name.
    #[must_use]
    pub fn user_id(&self, localpart: &str) -> String {
        format!("@{localpart}:{}", self.server_name)
    }
}

/// Server key store: cached signing keys of remote servers.
#[derive(Clone, Debug)]
pub struct ServerKeyStore {
    pool: PgPool,
}

impl ServerKeyStore {
    /// Wrap a pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}
