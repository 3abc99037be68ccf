//! # Plinth Web
//!
//! HTTP surface of a component process.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  TraceLayer                              │
//! │  ├── /api/*     component router + CORS  │
//! │  └── /metrics   Prometheus text          │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use plinth_web::{bind, build_app, resolve_bind_address, serve};
//!
//! let address = resolve_bind_address(&bind_flag, &config.listen.room_server);
//! let app = build_app(api_router, plinth_runtime::prometheus_handle()?);
//! serve("roomserver", bind(address).await?, app).await?;
//! ```

pub mod cors;
pub mod error;
pub mod handlers;
pub mod server;

pub use cors::cors_layer;
pub use error::ServeError;
pub use server::{bind, build_app, resolve_bind_address, serve, serve_with_shutdown};
