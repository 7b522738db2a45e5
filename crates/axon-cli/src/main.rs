//! CLI entry point for the Axon agent gateway.
//!
//! This binary provides the `axon` command: `serve` starts the HTTP gateway
//! with the agents listed in the configuration, `check-config` validates a
//! configuration without binding a port.

mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use axon_agent::{Gateway, ToolCatalog};
use axon_web::WebServer;

use crate::cli::{Cli, Commands};
use crate::config::GatewayConfig;

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind, port } => {
            let mut config = GatewayConfig::load(config.as_deref())?;
            init_tracing(&config.logging.level);
            config.apply_env(env_var)?;
            config.apply_flags(bind, port);
            cmd_serve(config).await
        }
        Commands::CheckConfig { config } => {
            let mut config = GatewayConfig::load(config.as_deref())?;
            init_tracing(&config.logging.level);
            config.apply_env(env_var)?;
            cmd_check_config(&config)
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(config: GatewayConfig) -> Result<()> {
    let gateway = build_gateway(&config)?;
    let server = WebServer::new(config.web_config(), gateway);
    let addr = server.addr();
    info!(addr = %addr, "starting Axon gateway");

    server
        .start()
        .await
        .with_context(|| format!("failed to serve on {addr}"))
}

/// Gateway with the configured providers and startup agents registered.
fn build_gateway(config: &GatewayConfig) -> Result<Gateway> {
    let gateway = Gateway::new(
        ToolCatalog::with_builtin_tools(),
        config.model_catalog(env_var),
    );

    for agent in &config.agents {
        gateway
            .create_agent(agent)
            .with_context(|| format!("failed to register agent `{}`", agent.agent_id))?;
    }
    info!(
        agents = gateway.registry().len(),
        tools = gateway.tools().len(),
        "gateway ready"
    );
    Ok(gateway)
}

// ---------------------------------------------------------------------------
// Subcommand: check-config
// ---------------------------------------------------------------------------

fn cmd_check_config(config: &GatewayConfig) -> Result<()> {
    let gateway = build_gateway(config)?;

    println!("Server:    {}:{}", config.server.bind_addr, config.server.port);
    println!("Log level: {}", config.logging.level);
    println!("Providers: {}", gateway.models().providers().join(", "));
    println!("Tools:     {}", gateway.tools().names().join(", "));
    println!("Agents:");
    if config.agents.is_empty() {
        println!("  (none)");
    }
    for summary in gateway.list_agents() {
        let tools: Vec<&str> = summary.tools.iter().map(|t| t.name.as_str()).collect();
        println!(
            "  {:<20} model={} tools=[{}] typed_result={}",
            summary.agent_id,
            summary.model,
            tools.join(", "),
            summary.result_schema.is_some()
        );
    }
    println!("Configuration OK");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber; `RUST_LOG` overrides `default_level`.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
