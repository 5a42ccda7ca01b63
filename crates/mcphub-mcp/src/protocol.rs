//! MCP protocol types.
//!
//! This module defines the JSON-RPC 2.0 envelopes and the MCP-specific
//! payloads exchanged with servers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::McpError;
use crate::types::ResourceContents;

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names used by the client.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    pub const LOG_MESSAGE: &str = "notifications/message";
}

/// Request ID for JSON-RPC messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric ID.
    Number(i64),
    /// String ID.
    String(String),
}

impl RequestId {
    /// The id as issued by this client, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => u64::try_from(*n).ok(),
            Self::String(_) => None,
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id as i64)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

/// JSON-RPC request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest<P = Value> {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Unique request ID.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Optional method parameters, omitted from the wire when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

impl<P> JsonRpcRequest<P> {
    /// Create a new JSON-RPC request.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<P>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Optional additional data. An empty string is read as absent.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_error_data"
    )]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Standard JSON-RPC error codes.
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Code used for failures that happened on the client side.
    pub const LOCAL_ERROR: i32 = -1;

    /// Create an error object.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

fn deserialize_error_data<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let data = Option::<Value>::deserialize(deserializer)?;
    Ok(match data {
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::Null) => None,
        other => other,
    })
}

/// JSON-RPC response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse<R = Value> {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request ID this is responding to.
    pub id: RequestId,
    /// Successful result (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    /// Error object (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl<R> JsonRpcResponse<R> {
    /// Create a successful response.
    pub fn success(id: RequestId, result: R) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response is an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC notification (no ID, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification<P = Value> {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Optional method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

impl<P> JsonRpcNotification<P> {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<P>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A message received from a server, classified by shape.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Response to one of our requests.
    Response(JsonRpcResponse),
    /// One-way notification.
    Notification(JsonRpcNotification),
    /// Request initiated by the server.
    Request(JsonRpcRequest),
}

impl IncomingMessage {
    /// Parse one frame received from a transport.
    pub fn parse(frame: &str) -> Result<Self, McpError> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| McpError::protocol(format!("invalid JSON: {}", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| McpError::protocol("message is not a JSON object"))?;

        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        let has_method = object.contains_key("method");
        let has_outcome = object.contains_key("result") || object.contains_key("error");

        let parsed = match (has_id, has_method, has_outcome) {
            (true, false, _) | (true, true, true) => {
                Self::Response(serde_json::from_value(value)?)
            }
            (true, true, false) => Self::Request(serde_json::from_value(value)?),
            (false, true, _) => Self::Notification(serde_json::from_value(value)?),
            (false, false, _) => {
                return Err(McpError::protocol("message has neither id nor method"));
            }
        };

        Ok(parsed)
    }
}

// ============================================================================
// MCP Protocol Types
// ============================================================================

/// Name and version of a protocol participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Participant name.
    pub name: String,
    /// Participant version.
    #[serde(default)]
    pub version: String,
}

impl Default for Implementation {
    fn default() -> Self {
        Self {
            name: "mcphub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Marker object for a declared capability category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryCapability {}

/// Client capabilities for initialization.
///
/// The client declares every capability category it can consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<CategoryCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<CategoryCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<CategoryCapability>,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(CategoryCapability::default()),
            resources: Some(CategoryCapability::default()),
            prompts: Some(CategoryCapability::default()),
        }
    }
}

/// Server capabilities returned during initialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tools capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListCapability>,
    /// Resources capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListCapability>,
    /// Prompts capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListCapability>,
    /// Logging capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

/// Capability of a listable category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCapability {
    /// Whether the server sends list_changed notifications.
    #[serde(default)]
    pub list_changed: bool,
    /// Whether the server supports subscriptions (resources only).
    #[serde(default)]
    pub subscribe: bool,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// MCP protocol version.
    pub protocol_version: String,
    /// Client capabilities.
    pub capabilities: ClientCapabilities,
    /// Client information.
    pub client_info: Implementation,
}

impl InitializeParams {
    /// Handshake parameters announcing the given client identity.
    pub fn new(client_info: Implementation) -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info,
        }
    }
}

/// Result of the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// MCP protocol version chosen by the server.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Server capabilities.
    #[serde(default)]
    pub capabilities: Option<ServerCapabilities>,
    /// Server information.
    pub server_info: Implementation,
}

/// Parameters for the tools/call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    pub arguments: Value,
}

/// Result of the tools/call request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content returned by the tool.
    #[serde(default)]
    pub content: Content,
    /// Whether the tool execution resulted in an error.
    #[serde(default)]
    pub is_error: bool,
}

/// Content as servers send it: a bare string, one block or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text.
    Text(String),
    /// Ordered content blocks.
    Blocks(Vec<ContentBlock>),
    /// A single content block.
    Block(ContentBlock),
}

impl Default for Content {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

impl Content {
    /// Flatten the content into one text, blocks joined by newlines in order.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Block(block) => block.to_text(),
            Self::Blocks(blocks) => blocks
                .iter()
                .map(ContentBlock::to_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A content block, typed when the block type is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    /// A block type this client understands.
    Known(ToolContent),
    /// Any other block, kept verbatim.
    Other(Value),
}

impl ContentBlock {
    /// Text of the block; non-text blocks render as their JSON form.
    pub fn to_text(&self) -> String {
        match self {
            Self::Known(ToolContent::Text { text }) => text.clone(),
            Self::Known(ToolContent::Resource {
                resource:
                    ResourceContents {
                        text: Some(text), ..
                    },
            }) => text.clone(),
            Self::Known(other) => serde_json::to_string(other).unwrap_or_default(),
            Self::Other(Value::Object(map)) => match map.get("text") {
                Some(Value::String(text)) => text.clone(),
                _ => Value::Object(map.clone()).to_string(),
            },
            Self::Other(value) => value.to_string(),
        }
    }
}

/// Content returned by a tool or prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Image content (base64 encoded).
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource.
    Resource {
        /// The embedded resource contents.
        resource: ResourceContents,
    },
}

impl ToolContent {
    /// Create a text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Parameters for the resources/read request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    /// Resource URI.
    pub uri: String,
}

/// Result of the resources/read request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// Contents of the resource, possibly in several parts.
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

impl ReadResourceResult {
    /// Concatenate the text parts of the resource.
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parameters for the prompts/get request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    /// Prompt name.
    pub name: String,
    /// Prompt arguments.
    pub arguments: Map<String, Value>,
}

/// Result of the prompts/get request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetPromptResult {
    /// Optional description of the rendered prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered prompt messages.
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

impl GetPromptResult {
    /// Concatenate the message contents in order.
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.to_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single rendered prompt message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Message role.
    #[serde(default)]
    pub role: String,
    /// Message content.
    #[serde(default)]
    pub content: Content,
}
