//! Domain types shared by the client, the host and the config loader.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::McpError;
use crate::protocol::{JsonRpcError, ServerCapabilities};

/// Separator between the server name and the item name.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// How a server is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON over stdio.
    #[default]
    Stdio,
    /// Server-sent event stream plus HTTP POST.
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport used to reach the server.
    #[serde(default)]
    pub transport_type: TransportKind,

    /// Transport parameters (`command`/`args`/`cwd` or `url`/`headers`/`send_url`).
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Extra environment variables for the server process.
    #[serde(default, deserialize_with = "deserialize_env")]
    pub env: BTreeMap<String, String>,

    /// Whether the server is connected on host initialization.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Environment value as the server process sees it.
///
/// Numbers and booleans keep their document spelling. Other values have
/// no environment form.
pub fn env_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn deserialize_env<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| match env_value(&value) {
            Some(value) => Ok((key, value)),
            None => Err(D::Error::custom(format!(
                "env '{}' must be a string, number or boolean",
                key
            ))),
        })
        .collect()
}

impl ServerConfig {
    /// Create a stdio server config.
    pub fn stdio(command: impl Into<String>) -> Self {
        let mut config = Map::new();
        config.insert("command".to_string(), Value::String(command.into()));
        Self {
            transport_type: TransportKind::Stdio,
            config,
            env: BTreeMap::new(),
            enabled: true,
        }
    }

    /// Create an event-stream server config.
    pub fn sse(url: impl Into<String>) -> Self {
        let mut config = Map::new();
        config.insert("url".to_string(), Value::String(url.into()));
        Self {
            transport_type: TransportKind::Sse,
            config,
            env: BTreeMap::new(),
            enabled: true,
        }
    }

    /// Parse one entry of a servers document.
    ///
    /// Accepts the legacy `is_active` flag when `enabled` is absent.
    pub fn from_value(value: Value) -> Result<Self, McpError> {
        let Value::Object(mut entry) = value else {
            return Err(McpError::Config("server entry must be an object".to_string()));
        };

        if let Some(active) = entry.remove("is_active") {
            entry.entry("enabled").or_insert(active);
        }

        serde_json::from_value(Value::Object(entry)).map_err(|e| McpError::Config(e.to_string()))
    }

    /// Set the process arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = args.into_iter().map(|a| Value::String(a.into())).collect();
        self.config.insert("args".to_string(), Value::Array(args));
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add an HTTP header sent with every event-stream request.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let headers = self
            .config
            .entry("headers")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = headers {
            map.insert(key.into(), Value::String(value.into()));
        }
        self
    }

    /// Set an explicit URL for outbound messages.
    pub fn with_send_url(mut self, url: impl Into<String>) -> Self {
        self.config
            .insert("send_url".to_string(), Value::String(url.into()));
        self
    }

    /// Set the working directory of the server process.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into().to_string_lossy().into_owned();
        self.config.insert("cwd".to_string(), Value::String(dir));
        self
    }

    /// Enable or disable the server.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Command to spawn (stdio).
    pub fn command(&self) -> Option<&str> {
        self.str_field("command").filter(|c| !c.trim().is_empty())
    }

    /// Process arguments (stdio). Non-string entries are ignored.
    pub fn args(&self) -> Vec<String> {
        self.config
            .get("args")
            .and_then(Value::as_array)
            .map(|args| {
                args.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Working directory of the process (stdio).
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.str_field("cwd").map(PathBuf::from)
    }

    /// Subscribe URL (sse).
    pub fn url(&self) -> Option<&str> {
        self.str_field("url").filter(|u| !u.trim().is_empty())
    }

    /// Explicit send URL (sse).
    pub fn send_url(&self) -> Option<&str> {
        self.str_field("send_url")
    }

    /// HTTP headers (sse). Non-string values are ignored.
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.config
            .get("headers")
            .and_then(Value::as_object)
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Information reported by a server during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    /// Advertised capabilities, if the server sent any.
    pub capabilities: Option<ServerCapabilities>,
}

/// A tool exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name, unique within its server.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,

    /// JSON Schema of the tool input.
    #[serde(rename = "inputSchema", alias = "input_schema", default)]
    pub input_schema: Value,
}

impl Tool {
    /// Create a tool with an empty object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    /// Name of the tool as exposed by the host.
    pub fn namespaced_name(&self, server: &str) -> String {
        namespaced(server, &self.name)
    }
}

/// A resource exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource URI, unique within its server.
    pub uri: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Contents of a resource as returned by `resources/read`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    #[serde(default)]
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Text contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Base64-encoded binary contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// A prompt template exposed by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

impl Prompt {
    /// Name of the prompt as exposed by the host.
    pub fn namespaced_name(&self, server: &str) -> String {
        namespaced(server, &self.name)
    }
}

/// A declared prompt argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,
}

/// Build a `server__name` identifier.
pub fn namespaced(server: &str, name: &str) -> String {
    format!("{}{}{}", server, NAMESPACE_SEPARATOR, name)
}

/// Connection state of a client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStatus {
    pub server_name: String,
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub tools_count: usize,
    pub resources_count: usize,
    pub prompts_count: usize,
}

/// Output of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    /// Flattened text content.
    Text(String),
    /// Structured payload, used for failures.
    Structured(Value),
}

impl ToolOutput {
    /// Render the output as text.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(Value::Object(map)) => match map.get("error") {
                Some(Value::String(msg)) if map.len() == 1 => msg.clone(),
                _ => Value::Object(map.clone()).to_string(),
            },
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Result of a tool call. Failures are carried here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Locally generated identifier of this call.
    pub call_id: String,
    pub content: ToolOutput,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl ToolResult {
    /// A successful result.
    pub fn success(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: ToolOutput::Text(text.into()),
            is_error: false,
            error: None,
        }
    }

    /// A result the server flagged with `isError`.
    pub fn tool_error(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            call_id: call_id.into(),
            content: ToolOutput::Text(text.clone()),
            is_error: true,
            error: Some(JsonRpcError::new(JsonRpcError::LOCAL_ERROR, text)),
        }
    }

    /// A call that failed to complete.
    pub fn failure(call_id: impl Into<String>, err: &McpError) -> Self {
        let error = match err {
            McpError::Server {
                code,
                message,
                data,
            } => JsonRpcError {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => JsonRpcError::new(JsonRpcError::LOCAL_ERROR, other.to_string()),
        };

        Self {
            call_id: call_id.into(),
            content: ToolOutput::Structured(serde_json::json!({ "error": error.message })),
            is_error: true,
            error: Some(error),
        }
    }

    /// Text of the result.
    pub fn text(&self) -> String {
        self.content.to_text()
    }
}
