//! HTTP boundary for the Axon agent gateway.
//!
//! This crate exposes [`axon_agent::Gateway`] over HTTP.  It includes:
//!
//! - A REST API for agent lifecycle, synchronous runs and direct tool calls.
//! - A Server-Sent Events endpoint streaming run fragments.
//! - A health endpoint backed by request/error counters.
//!
//! Handlers are a thin mapping: every failure is a
//! [`GatewayError`](axon_agent::GatewayError) rendered through
//! [`error::ApiError`].

pub mod api;
pub mod error;
pub mod health;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use health::HealthManager;
pub use server::{WebServer, router};
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8000,
        }
    }
}
