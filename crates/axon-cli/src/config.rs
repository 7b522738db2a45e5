//! Gateway configuration.
//!
//! Loaded from an optional TOML file, then adjusted by environment
//! variables and finally by command-line flags.  Every section is optional;
//! an empty file yields the defaults.
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1"
//! port = 8000
//!
//! [logging]
//! level = "debug"
//!
//! [providers.openai]
//! api_key_env = "OPENAI_API_KEY"
//! base_url = "http://localhost:11434/v1"
//!
//! [[agents]]
//! agent_id = "calculator"
//! model = "test"
//! tools = ["sum"]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use axon_agent::{AgentConfig, LlmClientConfig, ModelCatalog};
use axon_web::WebConfig;

/// Used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "config/axon.toml";

/// Overrides `[server] port`.
pub const PORT_ENV: &str = "AXON_PORT";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub providers: ProvidersConfig,
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let web = WebConfig::default();
        Self {
            bind_addr: web.bind_addr,
            port: web.port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
}

/// Where a remote provider's key lives and, optionally, its endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Name of the environment variable holding the API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    fn key_var<'a>(&'a self, default: &'a str) -> &'a str {
        self.api_key_env.as_deref().unwrap_or(default)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl GatewayConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid gateway configuration")
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_PATH`] when it exists, or
    /// fall back to defaults.  An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path: PathBuf = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    tracing::debug!("no config file, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config =
            Self::from_toml(&text).with_context(|| format!("in {}", path.display()))?;
        tracing::debug!(path = %path.display(), agents = config.agents.len(), "config loaded");
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = lookup(PORT_ENV) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{PORT_ENV} is not a valid port: {port:?}"))?;
        }
        Ok(())
    }

    /// Apply command-line overrides.
    pub fn apply_flags(&mut self, bind: Option<String>, port: Option<u16>) {
        if let Some(bind) = bind {
            self.server.bind_addr = bind;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
    }

    pub fn web_config(&self) -> WebConfig {
        WebConfig {
            bind_addr: self.server.bind_addr.clone(),
            port: self.server.port,
        }
    }

    /// Model catalog with the remote providers registered alongside `test`.
    ///
    /// Providers are registered even without a key so that resolving one of
    /// their models reports the missing key instead of an unknown provider.
    pub fn model_catalog(&self, lookup: impl Fn(&str) -> Option<String>) -> ModelCatalog {
        let catalog = ModelCatalog::new();

        let openai_key = self.providers.openai.key_var("OPENAI_API_KEY");
        let mut openai = LlmClientConfig::openai(lookup(openai_key).unwrap_or_default());
        if let Some(url) = &self.providers.openai.base_url {
            openai = openai.with_base_url(url.clone());
        }
        if openai.api_key.is_empty() {
            tracing::warn!(
                env = openai_key,
                "no OpenAI API key, openai models will fail to resolve"
            );
        }
        catalog.register("openai", openai);

        let anthropic_key = self.providers.anthropic.key_var("ANTHROPIC_API_KEY");
        let mut anthropic = LlmClientConfig::anthropic(lookup(anthropic_key).unwrap_or_default());
        if let Some(url) = &self.providers.anthropic.base_url {
            anthropic = anthropic.with_base_url(url.clone());
        }
        if anthropic.api_key.is_empty() {
            tracing::debug!(env = anthropic_key, "no Anthropic API key");
        }
        catalog.register("anthropic", anthropic);

        catalog
    }
}
