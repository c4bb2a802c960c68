//! Gateway configuration parsing and validation.
//!
//! Configuration is TOML with four sections:
//!
//! ```toml
//! [gateway]
//! listen = "0.0.0.0:5455"
//! ws_path = "/probe/eventbus"
//! metrics_listen = "127.0.0.1:9101"
//!
//! [storage]
//! selector = "memory"
//! # host/port required for any non-memory selector
//!
//! [[auth.accesses]]
//! client_id = "..."
//! client_secret = "..."
//! tenant_id = "..."       # optional
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Validation is fail-closed: a clustered storage selector without a
//! coordinator host/port is rejected at parse time, before any network
//! activity.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage selector for standalone mode.
pub const MEMORY_SELECTOR: &str = "memory";

/// Errors during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantic validation failure.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener and transport settings.
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Shared state store selection.
    #[serde(default)]
    pub storage: StorageSection,

    /// Probe authentication settings.
    #[serde(default)]
    pub auth: AuthSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate semantic constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a clustered storage selector
    /// is configured without a coordinator host and port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.selector != MEMORY_SELECTOR {
            if self.storage.host.is_none() || self.storage.port.is_none() {
                return Err(ConfigError::Validation(format!(
                    "storage selector '{}' requires [storage] host and port",
                    self.storage.selector
                )));
            }
        }
        Ok(())
    }

    /// Returns `true` when the gateway should run in clustered mode.
    #[must_use]
    pub fn is_clustered(&self) -> bool {
        self.storage.selector != MEMORY_SELECTOR
    }
}

/// Listener and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    /// Address the multi-protocol listener binds. Port 0 binds ephemeral.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// HTTP path prefix for the WebSocket bridge.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Address for the metrics/health side server. `None` disables it.
    #[serde(default)]
    pub metrics_listen: Option<String>,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ws_path: default_ws_path(),
            metrics_listen: None,
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:5455".to_string()
}

fn default_ws_path() -> String {
    "/probe/eventbus".to_string()
}

/// Shared state store selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Backend selector. `memory` means standalone mode; anything else is
    /// a clustered backend identifier resolved through the backend
    /// registry.
    #[serde(default = "default_selector")]
    pub selector: String,

    /// Coordinator host (clustered mode).
    #[serde(default)]
    pub host: Option<String>,

    /// Coordinator port (clustered mode).
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            selector: default_selector(),
            host: None,
            port: None,
        }
    }
}

fn default_selector() -> String {
    MEMORY_SELECTOR.to_string()
}

/// Probe authentication settings.
///
/// An empty access list disables authentication entirely; every probe is
/// accepted without credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSection {
    /// Configured client accesses.
    #[serde(default)]
    pub accesses: Vec<ClientAccessConfig>,
}

/// One configured client access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAccessConfig {
    /// Client identifier probes must present.
    pub client_id: String,
    /// Client secret probes must present.
    pub client_secret: String,
    /// Tenant this access belongs to, if any.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level filter (`trace`, `debug`, `info`, `warn`, `error`).
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
