//! CLI argument definitions for the `axon` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Axon -- an execution gateway for LLM-backed agents.
#[derive(Parser)]
#[command(
    name = "axon",
    version,
    about = "Axon -- agent execution gateway",
    long_about = "Hosts named LLM-backed agents with typed tools and validated results, \
                  and runs them over HTTP synchronously or as a Server-Sent Events stream."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP gateway.
    Serve {
        /// Configuration file (defaults to config/axon.toml when present).
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Address to bind the HTTP server to.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on.
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Parse the configuration and print the resolved settings.
    CheckConfig {
        /// Configuration file (defaults to config/axon.toml when present).
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::parse_from(["axon", "serve", "--port", "9000", "--bind", "127.0.0.1"]);
        match cli.command {
            Commands::Serve { config, bind, port } => {
                assert!(config.is_none());
                assert_eq!(bind.as_deref(), Some("127.0.0.1"));
                assert_eq!(port, Some(9000));
            }
            Commands::CheckConfig { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn check_config_takes_a_path() {
        let cli = Cli::parse_from(["axon", "check-config", "-c", "gateway.toml"]);
        assert!(matches!(
            cli.command,
            Commands::CheckConfig { config: Some(path) } if path == PathBuf::from("gateway.toml")
        ));
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
