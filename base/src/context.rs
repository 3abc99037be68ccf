//! The per-process context every component starts from.
//!
//! Construction runs once, in order: logging and tracing, configuration and
//! signing key, event bus, federation transport. Every failure is a fatal
//! [`BootError`]. After construction the config is shared read-only; the only
//! change ever made to it is the overlay server name, written before sharing.
//!
//! # Example
//!
//! ```ignore
//! use plinth_base::ProcessContext;
//! use plinth_core::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load("plinth.toml".as_ref())
//!         .unwrap_or_else(|e| BootError::from(e).exit());
//!     let mut context = ProcessContext::new_or_exit("roomserver", config).await;
//!     context.mount(roomserver_routes(&context)).unwrap_or_else(|e| e.exit());
//!     let listen = context.config().listen.room_server.clone();
//!     context.serve_or_exit("", &listen).await;
//! }
//! ```

use crate::clients::{
    AppServiceQueryApi, FederationSenderQueryApi, RoomserverAliasApi, RoomserverClients,
    RoomserverInputApi, RoomserverQueryApi, TypingServerInputApi,
};
use crate::event_bus::{EventBus, select_event_bus};
use crate::federation::FederationClient;
use crate::transport::{Network, establish_transport};
use axum::Router;
use plinth_core::{BootError, Config, LogStorage};
use plinth_postgres::{AccountStore, DeviceStore, PgPool, ServerKeyStore, StoreError, connect_store};
use plinth_runtime::{TracingHandle, init_logging, prometheus_handle};
use std::future::Future;
use std::sync::Arc;

/// Builds a [`ProcessContext`], with hooks for test harnesses.
pub struct ProcessContextBuilder {
    component_name: String,
    config: Config,
    log_storage: Option<Arc<dyn LogStorage>>,
    tracing: Option<TracingHandle>,
}

impl ProcessContextBuilder {
    /// Builder for `component_name` running with `config`.
    #[must_use]
    pub fn new(component_name: impl Into<String>, config: Config) -> Self {
        Self {
            component_name: component_name.into(),
            config,
            log_storage: None,
            tracing: None,
        }
    }

    /// Store the embedded log somewhere other than `database.embedded_log`.
    #[must_use]
    pub fn with_log_storage(mut self, storage: Arc<dyn LogStorage>) -> Self {
        self.log_storage = Some(storage);
        self
    }

    /// Use this tracing handle instead of starting one from `[tracing]`.
    #[must_use]
    pub fn with_tracing(mut self, tracing: TracingHandle) -> Self {
        self.tracing = Some(tracing);
        self
    }

    /// Construct the context.
    ///
    /// # Errors
    ///
    /// Returns the first [`BootError`] hit during construction.
    pub async fn build(self) -> Result<ProcessContext, BootError> {
        let Self {
            component_name,
            mut config,
            log_storage,
            tracing,
        } = self;

        init_logging(&config.logging).map_err(|e| BootError::Tracing(e.to_string()))?;
        let tracing = match tracing {
            Some(handle) => handle,
            None => TracingHandle::start(&config.tracing, &component_name)
                .map_err(|e| BootError::Tracing(e.to_string()))?,
        };

        config.validate()?;
        let signing_key = config.server.signing_key()?;
        let http = reqwest::Client::new();

        let event_bus = select_event_bus(&config, &component_name, log_storage).await?;
        let transport = establish_transport(&config.server, &config.overlay, &signing_key, &http)?;
        config.server.server_name.clone_from(&transport.server_name);

        tracing::info!(
            component = %component_name,
            server_name = %config.server.server_name,
            semantics = ?event_bus.semantics(),
            transport = ?transport.network.state(),
            "Process context ready"
        );

        Ok(ProcessContext {
            component_name,
            config: Arc::new(config),
            event_bus,
            network: transport.network,
            federation: transport.federation,
            http,
            api_router: Some(Router::new()),
            tracing,
        })
    }
}

/// Runtime resources of one component process.
#[derive(Debug)]
pub struct ProcessContext {
    component_name: String,
    config: Arc<Config>,
    event_bus: EventBus,
    network: Network,
    federation: FederationClient,
    http: reqwest::Client,
    api_router: Option<Router>,
    tracing: TracingHandle,
}

impl ProcessContext {
    /// Start building a context.
    #[must_use]
    pub fn builder(component_name: impl Into<String>, config: Config) -> ProcessContextBuilder {
        ProcessContextBuilder::new(component_name, config)
    }

    /// Construct a context with defaults.
    ///
    /// # Errors
    ///
    /// Returns the first [`BootError`] hit during construction.
    pub async fn new(component_name: impl Into<String>, config: Config) -> Result<Self, BootError> {
        Self::builder(component_name, config).build().await
    }

    /// Construct a context, exiting the process on failure.
    pub async fn new_or_exit(component_name: impl Into<String>, config: Config) -> Self {
        match Self::new(component_name, config).await {
            Ok(context) => context,
            Err(e) => e.exit(),
        }
    }

    /// Name of this component.
    #[must_use]
    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Effective server name: the configured name, or the peer ID in overlay mode.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.config.server.server_name
    }

    /// Event bus handles.
    #[must_use]
    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// The network this process federates over.
    #[must_use]
    pub const fn network(&self) -> &Network {
        &self.network
    }

    /// Outbound federation client.
    #[must_use]
    pub const fn federation(&self) -> &FederationClient {
        &self.federation
    }

    /// Tracing handle.
    #[must_use]
    pub const fn tracing(&self) -> &TracingHandle {
        &self.tracing
    }

    /// Whether [`serve`](Self::serve) has been called.
    #[must_use]
    pub const fn is_serving(&self) -> bool {
        self.api_router.is_none()
    }

    /// Add routes to the component API. Paths are relative to `/api`.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::AlreadyServing`] once serving has started.
    pub fn mount(&mut self, routes: Router) -> Result<(), BootError> {
        let router = self.api_router.take().ok_or(BootError::AlreadyServing)?;
        self.api_router = Some(router.merge(routes));
        Ok(())
    }

    /// Serve the component API and `/metrics` until the server fails.
    ///
    /// Binds `bind_address` if non-empty, else `listen_address`.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::AlreadyServing`] on a second call, or
    /// [`BootError::Serve`] if binding or serving fails.
    pub async fn serve(
        &mut self,
        bind_address: &str,
        listen_address: &str,
    ) -> Result<(), BootError> {
        self.serve_until(bind_address, listen_address, std::future::pending())
            .await
    }

    /// Serve until `shutdown` resolves or the server fails.
    ///
    /// # Errors
    ///
    /// Same as [`serve`](Self::serve).
    pub async fn serve_until<F>(
        &mut self,
        bind_address: &str,
        listen_address: &str,
        shutdown: F,
    ) -> Result<(), BootError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.api_router.take().ok_or(BootError::AlreadyServing)?;
        let address = plinth_web::resolve_bind_address(bind_address, listen_address);

        let metrics = prometheus_handle().map_err(|e| BootError::Serve {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        let app = plinth_web::build_app(router, metrics);

        let listener = plinth_web::bind(address).await.map_err(serve_error)?;
        plinth_web::serve_with_shutdown(&self.component_name, listener, app, shutdown)
            .await
            .map_err(serve_error)
    }

    /// Serve, exiting the process on failure.
    pub async fn serve_or_exit(&mut self, bind_address: &str, listen_address: &str) {
        if let Err(e) = self.serve(bind_address, listen_address).await {
            e.exit();
        }
    }

    /// Client for the application service gateway.
    #[must_use]
    pub fn create_app_service_query_api(&self) -> AppServiceQueryApi {
        AppServiceQueryApi::new(self.http.clone(), self.config.listen.app_service_url())
    }

    /// Alias client for the room server.
    #[must_use]
    pub fn create_roomserver_alias_api(&self) -> RoomserverAliasApi {
        RoomserverAliasApi::new(self.http.clone(), self.config.listen.room_server_url())
    }

    /// Input client for the room server.
    #[must_use]
    pub fn create_roomserver_input_api(&self) -> RoomserverInputApi {
        RoomserverInputApi::new(self.http.clone(), self.config.listen.room_server_url())
    }

    /// Query client for the room server.
    #[must_use]
    pub fn create_roomserver_query_api(&self) -> RoomserverQueryApi {
        RoomserverQueryApi::new(self.http.clone(), self.config.listen.room_server_url())
    }

    /// All three room server clients.
    #[must_use]
    pub fn create_roomserver_clients(&self) -> RoomserverClients {
        RoomserverClients::new(&self.http, &self.config.listen.room_server_url())
    }

    /// Input client for the typing server.
    #[must_use]
    pub fn create_typing_server_input_api(&self) -> TypingServerInputApi {
        TypingServerInputApi::new(self.http.clone(), self.config.listen.typing_server_url())
    }

    /// Query client for the federation sender.
    #[must_use]
    pub fn create_federation_sender_query_api(&self) -> FederationSenderQueryApi {
        FederationSenderQueryApi::new(self.http.clone(), self.config.listen.federation_sender_url())
    }

    /// Open the device store.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::StoreConnection`] if it cannot be reached.
    pub async fn create_device_db(&self) -> Result<DeviceStore, BootError> {
        let pool = self.connect("device", self.config.database.device.as_deref()).await?;
        Ok(DeviceStore::new(pool, self.server_name()))
    }

    /// Open the account store.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::StoreConnection`] if it cannot be reached.
    pub async fn create_accounts_db(&self) -> Result<AccountStore, BootError> {
        let pool = self.connect("account", self.config.database.account.as_deref()).await?;
        Ok(AccountStore::new(pool, self.server_name()))
    }

    /// Open the server key store.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::StoreConnection`] if it cannot be reached.
    pub async fn create_key_db(&self) -> Result<ServerKeyStore, BootError> {
        let pool = self
            .connect("server_key", self.config.database.server_key.as_deref())
            .await?;
        Ok(ServerKeyStore::new(pool))
    }

    async fn connect(&self, store: &'static str, url: Option<&str>) -> Result<PgPool, BootError> {
        connect_store(store, url, self.config.database.max_connections)
            .await
            .map_err(|e: StoreError| BootError::StoreConnection {
                store: e.store(),
                reason: e.to_string(),
            })
    }

    /// Release the tracing handle. Returns `true` if this call released it.
    pub fn close(&self) -> bool {
        self.tracing.close()
    }

    /// Tear everything down: stop the overlay, close the event bus, release tracing.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(identity) = self.network.overlay() {
            identity.shutdown().await;
        }
        if let Err(e) = self.event_bus.producer.close().await {
            tracing::warn!(component = %self.component_name, error = %e, "Event bus close failed");
        }
        if self.close() {
            tracing::info!(component = %self.component_name, "Process context shut down");
        }
    }
}

fn serve_error(e: plinth_web::ServeError) -> BootError {
    BootError::Serve {
        address: e.address().to_string(),
        reason: e.to_string(),
    }
}
