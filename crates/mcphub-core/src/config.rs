//! Configuration system for mcphub.
//!
//! Application settings are layered with figment: built-in defaults, the
//! user config file, the project config files and finally `MCPHUB_`
//! environment variables (nested keys separated by `__`, for example
//! `MCPHUB_LIMITS__REQUEST_TIMEOUT_SECS=30`).
//!
//! The MCP server list itself lives in a separate servers file, see
//! [`Config::servers_file`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Name of the servers file looked up in the current directory.
pub const DEFAULT_SERVERS_FILE: &str = "mcp_servers_config.json";

/// Main configuration struct for mcphub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Timeouts and limits
    pub limits: LimitsConfig,
    /// Runtime overrides for individual servers, keyed by server name.
    ///
    /// Each value is either a partial block (`enabled`, `env`) patching a
    /// server from the servers file, or a full server definition.
    pub overrides: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Explicit path to the servers file
    pub servers_file: Option<PathBuf>,
    /// Log filter used when RUST_LOG is not set
    pub log_level: String,
    /// Client name announced to servers during the handshake
    pub client_name: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            servers_file: None,
            log_level: "info".to_string(),
            client_name: "mcphub".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Seconds to wait for a response to a single request
    pub request_timeout_secs: u64,
    /// Seconds a child process gets to exit after SIGTERM
    pub shutdown_grace_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            shutdown_grace_secs: 5,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Append all issues from another result.
    pub fn extend(&mut self, other: ValidationResult) {
        self.issues.extend(other.issues);
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "limits.request_timeout_secs")
    pub field: String,
    /// Human-readable message
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
    /// Build the layered figment without extracting it.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(".mcphub/config.toml"))
            // Project local config (gitignored)
            .merge(Toml::file(".mcphub/config.local.toml"))
            .merge(Env::prefixed("MCPHUB_").split("__"))
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Load configuration from all sources plus an extra TOML file.
    ///
    /// The extra file sits above the project files but below the
    /// environment.
    pub fn load_with_file(path: impl Into<PathBuf>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Self::figment())
            .merge(Toml::file(path.into()))
            .merge(Env::prefixed("MCPHUB_").split("__"))
            .extract()
    }

    /// Fail on validation errors and log warnings.
    pub fn check(&self) -> Result<(), Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Validation(errors.join("; ")));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.general.log_level.trim().is_empty() {
            result.add_error("general.log_level", "log_level cannot be empty");
        } else {
            let simple_levels = ["trace", "debug", "info", "warn", "error", "off"];
            let level = self.general.log_level.to_ascii_lowercase();
            if !level.contains('=') && !simple_levels.contains(&level.as_str()) {
                result.add_warning(
                    "general.log_level",
                    format!("Unrecognized log level '{}'", self.general.log_level),
                );
            }
        }

        if self.general.client_name.is_empty() {
            result.add_error("general.client_name", "client_name cannot be empty");
        }

        if let Some(ref path) = self.general.servers_file {
            if !path.exists() {
                result.add_warning(
                    "general.servers_file",
                    format!("Servers file {:?} does not exist", path),
                );
            }
        }

        if self.limits.request_timeout_secs == 0 {
            result.add_error(
                "limits.request_timeout_secs",
                "request_timeout_secs must be greater than 0",
            );
        }

        if self.limits.request_timeout_secs > 600 {
            result.add_warning(
                "limits.request_timeout_secs",
                "request_timeout_secs is very high (> 10 minutes), hung servers will block callers",
            );
        }

        for (name, value) in &self.overrides {
            if !value.is_object() {
                result.add_error(
                    format!("overrides.{}", name),
                    "override must be a table",
                );
            }
        }

        result
    }

    /// Resolve the servers file to load.
    ///
    /// An explicit `general.servers_file` always wins. Otherwise the first
    /// existing candidate is used: `mcp_servers_config.json` in the current
    /// directory, then `mcp_servers.toml` and `mcp_servers.json` in the
    /// config directory.
    pub fn servers_file(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.general.servers_file {
            return Some(path.clone());
        }

        let config_dir = Self::config_dir();
        [
            PathBuf::from(DEFAULT_SERVERS_FILE),
            config_dir.join("mcp_servers.toml"),
            config_dir.join("mcp_servers.json"),
        ]
        .into_iter()
        .find(|candidate| candidate.exists())
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("mcphub"))
            .unwrap_or_else(|| PathBuf::from("~/.config/mcphub"))
    }
}
