//! Shared application state for the web server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers.  The gateway is itself cheaply cloneable; the state only adds
//! the health counters the handlers feed.

use axon_agent::{Gateway, GatewayError};

use crate::WebConfig;
use crate::error::ApiError;
use crate::health::HealthManager;

/// Shared state accessible from every Axum handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Agent registry, catalogs and dispatcher.
    pub gateway: Gateway,

    /// Request and failure counters reported by `/health`.
    pub health: HealthManager,

    /// Web server configuration.
    pub config: WebConfig,
}

impl AppState {
    pub fn new(gateway: Gateway, config: WebConfig) -> Self {
        Self {
            gateway,
            health: HealthManager::new(),
            config,
        }
    }

    /// Record a failed operation and turn it into a response.
    pub fn fail(&self, operation: &'static str, err: GatewayError) -> ApiError {
        self.health.record_error();
        let outcome = err.outcome();
        if outcome.http_status >= 500 {
            tracing::error!(operation, code = outcome.code, error = %err, "request failed");
        } else {
            tracing::warn!(operation, code = outcome.code, error = %err, "request rejected");
        }
        ApiError(err)
    }
}
