//! Configuration system for toolhub.

use std::collections::HashSet;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::server::ServerDescriptor;

/// Main configuration struct for toolhub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Session timeouts and keepalive
    pub session: SessionConfig,
    /// Reconnect backoff
    pub backoff: BackoffConfig,
    /// Marketplace catalog sources
    pub marketplace: MarketplaceConfig,
    /// Descriptor persistence
    pub store: StoreConfig,
    /// Statically configured servers
    pub servers: Vec<ServerDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Client name sent during the handshake
    pub client_name: String,
    /// Connect statically configured and stored servers on startup
    pub auto_connect: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            client_name: "toolhub".to_string(),
            auto_connect: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Handshake timeout (ms)
    pub handshake_timeout_ms: u64,
    /// Per-call timeout (ms)
    pub call_timeout_ms: u64,
    /// Keepalive ping interval (ms), 0 disables it
    pub heartbeat_interval_ms: u64,
    /// Reconnect attempts
    pub retry_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            call_timeout_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay (ms)
    pub base_ms: u64,
    /// Multiplier applied per attempt
    pub factor: u32,
    /// Upper bound on a single delay (ms)
    pub cap_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            factor: 2,
            cap_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Include the built-in catalog
    pub include_builtin: bool,
    /// Extra catalog file (JSON array of entries)
    pub catalog_path: Option<PathBuf>,
    /// Remote catalog URL (JSON array of entries)
    pub catalog_url: Option<String>,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            include_builtin: true,
            catalog_path: None,
            catalog_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Persist descriptors across restarts
    pub enabled: bool,
    /// Database path (defaults to the data directory)
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Field path (e.g., "session.call_timeout_ms")
    pub field: String,
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_dir = Self::config_dir();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            // User config
            .merge(Toml::file(config_dir.join("config.toml")))
            // Project config
            .merge(Toml::file(".toolhub/config.toml"))
            // Project local config (gitignored)
            .merge(Toml::file(".toolhub/config.local.toml"))
            // TOOLHUB_SESSION__CALL_TIMEOUT_MS=5000
            .merge(Env::prefixed("TOOLHUB_").split("__"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.general.client_name.trim().is_empty() {
            result.add_error("general.client_name", "client_name cannot be empty");
        }

        if self.session.handshake_timeout_ms == 0 {
            result.add_error("session.handshake_timeout_ms", "handshake_timeout_ms must be greater than 0");
        }

        if self.session.call_timeout_ms == 0 {
            result.add_error("session.call_timeout_ms", "call_timeout_ms must be greater than 0");
        }

        if self.session.retry_attempts == 0 {
            result.add_error("session.retry_attempts", "retry_attempts must be at least 1");
        } else if self.session.retry_attempts > 10 {
            result.add_warning("session.retry_attempts", "retry_attempts is very high (> 10), reconnects may take minutes");
        }

        if self.session.heartbeat_interval_ms > 0 && self.session.heartbeat_interval_ms < 1_000 {
            result.add_warning("session.heartbeat_interval_ms", "heartbeat interval below 1s will flood servers with pings");
        }

        if self.backoff.base_ms == 0 {
            result.add_error("backoff.base_ms", "base_ms must be greater than 0");
        }

        if self.backoff.factor == 0 {
            result.add_error("backoff.factor", "factor must be at least 1");
        }

        if self.backoff.cap_ms < self.backoff.base_ms {
            result.add_error("backoff.cap_ms", "cap_ms cannot be lower than base_ms");
        }

        if let Some(ref url) = self.marketplace.catalog_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                result.add_error("marketplace.catalog_url", "catalog_url must start with http:// or https://");
            }
        }

        let mut seen = HashSet::new();
        for (index, server) in self.servers.iter().enumerate() {
            let field = format!("servers[{}]", index);
            if !seen.insert(server.id.as_str()) {
                result.add_error(&field, format!("duplicate server id '{}'", server.id));
            }
            if let Err(e) = server.validate() {
                result.add_error(&field, e.to_string());
            }
        }

        result
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("toolhub"))
            .unwrap_or_else(|| PathBuf::from("~/.config/toolhub"))
    }

    /// Get the data directory (descriptor store, catalogs).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("toolhub"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/toolhub"))
    }

    /// Effective path of the descriptor database.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("servers.db"))
    }
}
