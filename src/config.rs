//! TOML configuration for the bridge server.
//!
//! Every field has a default, so a missing file or an empty one yields a
//! working localhost setup. CLI flags are layered on top by the binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentConfig, DEFAULT_MAX_STEPS, DEFAULT_SYSTEM_PROMPT};

pub const DEFAULT_BIND: &str = "127.0.0.1:5500";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MODEL_ENDPOINT: &str = "http://localhost:5000/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Top-level config, loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Bearer token required on every route except `/health`.
    pub token: Option<String>,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5500)),
            token: None,
            cors_origins: vec![
                "http://localhost:5000".to_string(),
                "http://localhost:5173".to_string(),
                "http://localhost:8080".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Deadline for one tool call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_steps: usize,
    pub system_prompt: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_MODEL_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Errors that can occur when loading config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {}: {source}", .path.display())]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl BridgeConfig {
    /// Default location: `$XDG_CONFIG_HOME/drawbridge/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("drawbridge").join("config.toml"))
    }

    /// Load config from a TOML file path. A missing file yields defaults.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })?;

        if config.has_secrets() {
            check_config_permissions(path);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.timeout_ms must be greater than zero".into(),
            ));
        }
        if self.model.max_steps == 0 {
            return Err(ConfigError::Invalid(
                "model.max_steps must be at least 1".into(),
            ));
        }
        if self.model.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("model.endpoint must not be empty".into()));
        }
        Ok(())
    }

    fn has_secrets(&self) -> bool {
        self.server.token.is_some() || self.model.api_key.is_some()
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            model: self.model.model.clone(),
            system_prompt: self.model.system_prompt.clone(),
            max_steps: self.model.max_steps,
            tool_timeout: Some(self.dispatch.timeout()),
        }
    }
}

/// Check file permissions on a config file and warn if world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Config file {} is world-readable (mode {:o}). \
             It contains credentials -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
