//! Reconnect daemon and HTTP API for TWS earbuds and speakers.
//!
//! `budlinkd` runs the reconnect scheduler from [`budlink_core`] on its own
//! task, keeps the reconnect table in SQLite through [`budlink_store`], and
//! talks to a separate radio bridge process over HTTP and a WebSocket.
//!
//! # Data flow
//!
//! ```text
//! radio bridge ──link events──▶ /api/link-events, /api/ws ──▶ LinkRegistry ──▶ scheduler
//! radio bridge ◀──host commands── /api/ws ◀── HostBridge ◀─────────────────── scheduler
//! ```
//!
//! # Modules
//!
//! - [`api`]: REST endpoints
//! - [`ws`]: WebSocket link to the radio bridge
//! - [`bridge`]: the scheduler's transport and TWS pairing seams
//! - [`storage`]: the scheduler's storage seam over [`budlink_store::Store`]
//! - [`config`]: TOML configuration
//! - [`middleware`]: API key authentication
//!
//! # Example
//!
//! ```no_run
//! use budlink_service::{AppState, Config, app};
//! use budlink_store::Store;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load_default()?;
//! let store = Store::open(&config.storage.path)?;
//! let state = AppState::new(store, config.clone())?;
//!
//! let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
//! axum::serve(listener, app(state, &config)).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod bridge;
pub mod config;
pub mod middleware;
pub mod state;
pub mod storage;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use bridge::HostBridge;
pub use config::{
    Config, ConfigError, ConnectSettings, PolicySettings, SecurityConfig, ServerConfig,
    StorageConfig, ValidationError,
};
pub use state::{AppState, LinkReport};
pub use storage::StoreBackend;

/// Assemble the full HTTP application: REST API, WebSocket, authentication,
/// tracing and CORS.
pub fn app(state: Arc<AppState>, config: &Config) -> Router {
    let security = Arc::new(config.security.clone());

    Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(axum::middleware::from_fn_with_state(
            security,
            middleware::api_key_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
