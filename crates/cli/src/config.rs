//! Configuration loading from toolbridge.toml.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mcp::McpConnector;
use runtime::providers::gemini::{API_KEY_ENV, DEFAULT_MODEL};
use runtime::{GeminiBackendBuilder, MAX_ROUNDS, OrchestratorConfig};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "toolbridge.toml";
const DEFAULT_CATALOG: &str = "toolbridge-servers.json";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub runtime: RuntimeConfig,
    /// Path of the server catalog file.
    pub catalog: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            runtime: RuntimeConfig::default(),
            catalog: PathBuf::from(DEFAULT_CATALOG),
        }
    }
}

/// Model provider configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Provider name (currently only "gemini" supported).
    pub provider: String,

    pub model: String,

    /// Falls back to `GEMINI_API_KEY` when absent.
    pub api_key: Option<String>,

    /// Override for the provider's API root.
    pub base_url: Option<String>,

    pub system: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: None,
            system: None,
        }
    }
}

/// Connection and chat loop settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_rounds: usize,
    /// Per-request timeout for tool servers. Absent means no timeout.
    pub request_timeout_secs: Option<u64>,
    pub tools_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_rounds: MAX_ROUNDS,
            request_timeout_secs: None,
            tools_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.runtime.max_rounds == 0 {
            return Err(ConfigError::Parse(
                "runtime.max_rounds must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    pub fn connector(&self) -> McpConnector {
        match self.runtime.request_timeout_secs {
            Some(secs) => McpConnector::new().with_request_timeout(Duration::from_secs(secs)),
            None => McpConnector::new(),
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_rounds: self.runtime.max_rounds,
            tools_enabled: self.runtime.tools_enabled,
        }
    }

    /// Build the backend builder from config, reading the key from the
    /// environment when the file does not set one.
    pub fn backend(&self) -> Result<GeminiBackendBuilder, ConfigError> {
        self.backend_with_env_key(std::env::var(API_KEY_ENV).ok())
    }

    fn backend_with_env_key(
        &self,
        env_key: Option<String>,
    ) -> Result<GeminiBackendBuilder, ConfigError> {
        if self.backend.provider != "gemini" {
            return Err(ConfigError::UnsupportedProvider(
                self.backend.provider.clone(),
            ));
        }

        let api_key = self
            .backend
            .api_key
            .clone()
            .or(env_key)
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let mut builder = GeminiBackendBuilder::new(api_key, &self.backend.model);
        if let Some(base_url) = &self.backend.base_url {
            builder = builder.base_url(base_url);
        }
        if let Some(system) = &self.backend.system {
            builder = builder.system(system);
        }
        Ok(builder)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unsupported backend provider '{0}'; only \"gemini\" is available")]
    UnsupportedProvider(String),

    #[error("api key not configured: set backend.api_key or GEMINI_API_KEY")]
    MissingApiKey,
}
