//! Loading MCP server definitions from JSON or TOML documents.
//!
//! A document maps server names to entries of the form
//!
//! ```json
//! {
//!   "mcp_servers": {
//!     "fs": {
//!       "transport_type": "stdio",
//!       "config": {"command": "mcp-fs", "args": ["/tmp"]},
//!       "env": {"LOG": "1"},
//!       "enabled": true
//!     }
//!   }
//! }
//! ```
//!
//! The `mcp_servers` wrapper is optional. Bad entries are logged and
//! skipped so one typo does not take every server down.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use mcphub_core::ValidationResult;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::types::{env_value, ServerConfig, TransportKind};

/// Key the server table may be nested under.
pub const SERVERS_KEY: &str = "mcp_servers";

/// Syntax of a servers document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// `.toml` files are TOML, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Reads, merges and checks server definitions.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load servers from a file. A missing file yields an empty map.
    pub fn load(path: impl AsRef<Path>) -> Result<BTreeMap<String, ServerConfig>, McpError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "MCP servers file not found");
            return Ok(BTreeMap::new());
        }

        let text = std::fs::read_to_string(path)?;
        let servers = Self::parse_str(&text, ConfigFormat::from_path(path)).map_err(|e| match e {
            McpError::Config(msg) => McpError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;

        info!(path = %path.display(), count = servers.len(), "Loaded MCP server definitions");
        Ok(servers)
    }

    /// Load the servers file selected by the application config and apply
    /// its runtime overrides.
    pub fn load_for(config: &mcphub_core::Config) -> Result<BTreeMap<String, ServerConfig>, McpError> {
        let base = match config.servers_file() {
            Some(path) => Self::load(path)?,
            None => {
                debug!("No MCP servers file found");
                BTreeMap::new()
            }
        };
        Ok(Self::apply_overrides(&base, &config.overrides))
    }

    /// Parse an in-memory document.
    pub fn parse_str(
        text: &str,
        format: ConfigFormat,
    ) -> Result<BTreeMap<String, ServerConfig>, McpError> {
        let document: Value = match format {
            ConfigFormat::Json => serde_json::from_str(text)
                .map_err(|e| McpError::Config(format!("invalid JSON: {}", e)))?,
            ConfigFormat::Toml => toml::from_str(text)
                .map_err(|e| McpError::Config(format!("invalid TOML: {}", e)))?,
        };

        let table = match document {
            Value::Object(mut root) => match root.remove(SERVERS_KEY) {
                Some(Value::Object(servers)) => servers,
                Some(_) => {
                    return Err(McpError::Config(format!("'{}' must be a table", SERVERS_KEY)));
                }
                None => root,
            },
            _ => return Err(McpError::Config("servers document must be a table".to_string())),
        };

        let mut servers = BTreeMap::new();
        for (name, entry) in table {
            match parse_entry(entry) {
                Ok(config) => {
                    debug!(server = %name, transport = %config.transport_type, "Parsed server entry");
                    servers.insert(name, config);
                }
                Err(e) => warn!(server = %name, error = %e, "Skipping invalid server entry"),
            }
        }
        Ok(servers)
    }

    /// Merge runtime overrides into a copy of `base`.
    ///
    /// For a known server only `enabled` and `env` are taken from the
    /// override; an unknown server must be a complete entry.
    pub fn apply_overrides(
        base: &BTreeMap<String, ServerConfig>,
        overrides: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, ServerConfig> {
        let mut merged = base.clone();

        for (name, patch) in overrides {
            match merged.get_mut(name) {
                Some(existing) => {
                    if let Some(enabled) = patch
                        .get("enabled")
                        .or_else(|| patch.get("is_active"))
                        .and_then(Value::as_bool)
                    {
                        existing.enabled = enabled;
                    }
                    if let Some(env) = patch.get("env").and_then(Value::as_object) {
                        for (key, value) in env {
                            match env_value(value) {
                                Some(value) => {
                                    existing.env.insert(key.clone(), value);
                                }
                                None => {
                                    warn!(server = %name, key = %key, "Ignoring non-scalar env override")
                                }
                            }
                        }
                    }
                    debug!(server = %name, "Applied override");
                }
                None => match parse_entry(patch.clone()) {
                    Ok(config) => {
                        debug!(server = %name, "Added server from override");
                        merged.insert(name.clone(), config);
                    }
                    Err(e) => warn!(server = %name, error = %e, "Skipping invalid server override"),
                },
            }
        }

        merged
    }

    /// Check a server entry for problems that would stop it from connecting.
    pub fn validate(name: &str, config: &ServerConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        match config.transport_type {
            TransportKind::Stdio => match config.command() {
                None => result.add_error(format!("{}.config.command", name), "stdio server needs a command"),
                Some(command) if !command_exists(command) => result.add_warning(
                    format!("{}.config.command", name),
                    format!("'{}' was not found on PATH", command),
                ),
                Some(_) => {}
            },
            TransportKind::Sse => match config.url() {
                None => result.add_error(format!("{}.config.url", name), "sse server needs a url"),
                Some(url) => match reqwest::Url::parse(url) {
                    Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                    Ok(parsed) => result.add_warning(
                        format!("{}.config.url", name),
                        format!("unexpected URL scheme '{}'", parsed.scheme()),
                    ),
                    Err(e) => result.add_warning(
                        format!("{}.config.url", name),
                        format!("'{}' is not a valid URL: {}", url, e),
                    ),
                },
            },
        }

        result
    }
}

/// Parse one entry, defaulting the transport to stdio.
fn parse_entry(entry: Value) -> Result<ServerConfig, McpError> {
    let mut entry = entry;
    if let Value::Object(ref mut map) = entry {
        map.entry("transport_type")
            .or_insert_with(|| Value::String(TransportKind::Stdio.to_string()));
    }
    ServerConfig::from_value(entry)
}

/// Check whether a command can be executed.
///
/// Paths are checked directly; bare names are searched on `PATH`.
pub fn command_exists(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file();
    }

    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(command))
                .any(|candidate: PathBuf| candidate.is_file())
        })
        .unwrap_or(false)
}
