//! HTTP status server
//!
//! A small read-only HTTP surface over the snapshot store, served next to the
//! harvester so operators can check on a running retrieval.
//!
//! # Endpoints
//!
//! - `GET /health` - liveness probe, always `OK`
//! - `GET /stats` - partition count and per-partition snapshot counts
//!   (`?format=json` for a JSON list)
//! - `GET /dbbackup` - consistent SQLite image of the store as a download
//! - `GET /testread` - latest payload of the configured read-back path
//! - `GET /latest/*path` - latest payload of any path
//!
//! # Usage
//!
//! ```rust,ignore
//! use escrutinio::server::{start_server, ServerConfig, ServerState};
//!
//! let state = ServerState::new(store);
//! let config = ServerConfig::default().with_port(8081);
//! start_server(state, config, shutdown).await?;
//! ```

pub mod handler;
pub mod handlers;

pub use handler::{ApiError, ServerState, DEFAULT_BACKUP_NAME};

use anyhow::anyhow;
use axum::{routing::get, Router as AxumRouter};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

// =============================================================================
// Server Configuration
// =============================================================================

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub address: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Get the full bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// =============================================================================
// Axum Router Creation
// =============================================================================

/// Create the Axum router with every endpoint registered
pub fn create_axum_router(state: ServerState) -> AxumRouter {
    use handlers::*;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    AxumRouter::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/dbbackup", get(backup_handler))
        .route("/testread", get(testread_handler))
        .route("/latest/*path", get(latest_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> &'static str {
    "OK"
}

// =============================================================================
// Server Startup
// =============================================================================

/// Bind the listening socket
///
/// Split from [`serve`] so a bind failure surfaces before any harvesting
/// starts.
pub async fn bind_listener(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let bind_address = config.bind_address();
    TcpListener::bind(&bind_address)
        .await
        .map_err(|e| anyhow!("Failed to bind status server to {}: {}", bind_address, e))
}

/// Serve requests on `listener` until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_axum_router(state);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Status server listening on {}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow!("Status server failed: {}", e))?;

    tracing::info!("Status server stopped");
    Ok(())
}

/// Bind and serve in one step
pub async fn start_server(
    state: ServerState,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = bind_listener(&config).await?;
    serve(listener, state, shutdown).await
}

// =============================================================================
// Tests
// =============================================================================
