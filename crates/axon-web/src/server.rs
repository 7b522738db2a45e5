//! Main web server setup and startup.
//!
//! [`WebServer`] composes the Axum router, registers all routes, and starts
//! the HTTP listener.  [`router`] is exposed separately so tests can serve
//! it on an ephemeral port.

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axon_agent::Gateway;

use crate::WebConfig;
use crate::api;
use crate::state::AppState;

/// Build the Axum router with all routes registered.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        // Agent lifecycle.
        .route("/agents", get(api::list_agents).post(api::create_agent))
        .route(
            "/agents/{agent_id}",
            get(api::get_agent).delete(api::delete_agent),
        )
        // Execution.
        .route("/agents/{agent_id}/run_sync", post(api::run_sync))
        .route("/agents/{agent_id}/run_stream", post(api::run_stream))
        .route("/agents/{agent_id}/tool_call", post(api::tool_call))
        // Health.
        .route("/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The Axon HTTP server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server around a configured gateway.
    pub fn new(config: WebConfig, gateway: Gateway) -> Self {
        let state = Arc::new(AppState::new(gateway, config.clone()));
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Start the server and block until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> std::io::Result<()> {
        let addr = self.addr();
        let app = router(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(
            addr = %addr,
            agents = self.state.gateway.registry().len(),
            "starting web server"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("web server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
