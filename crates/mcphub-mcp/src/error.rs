//! MCP-specific error types.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// HTTP request could not be completed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// HTTP request completed with a non-success status.
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The transport parameters are unusable.
    #[error("invalid transport config: {0}")]
    InvalidConfig(String),

    /// `start()` was called on a transport that is already running.
    #[error("transport already started")]
    AlreadyStarted,

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Connecting to a server failed.
    #[error("failed to connect to {server}: {reason}")]
    ConnectionFailed { server: String, reason: String },

    /// Protocol-level error (malformed messages, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned an error response.
    #[error("server error (code {code}): {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// Request timed out.
    #[error("request '{method}' timed out after {seconds} seconds")]
    Timeout { method: String, seconds: u64 },

    /// Server configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tool not found on server.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Resource not found on server.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Prompt not found on server.
    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    /// Server not found by name.
    #[error("unknown server: {0}")]
    ServerNotFound(String),

    /// Server is known but its client is not connected.
    #[error("server not connected: {0}")]
    ServerNotConnected(String),

    /// Server is configured but disabled.
    #[error("server disabled: {0}")]
    ServerDisabled(String),

    /// Server already exists with this name.
    #[error("server already exists: {0}")]
    ServerAlreadyExists(String),

    /// A namespaced name without the `__` separator.
    #[error("invalid name format: {0}, expected format: server__name")]
    InvalidToolName(String),

    /// The client has no open connection.
    #[error("not connected")]
    NotConnected,

    /// The request was abandoned because the client disconnected.
    #[error("client disconnected before a response arrived")]
    Disconnected,

    /// Connection is not in the correct state.
    #[error("invalid connection state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a connection failed error.
    pub fn connection_failed(server: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            server: server.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a server error from a JSON-RPC error object.
    pub fn server_error(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::Server {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether the server itself reported this error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Server { .. })
    }
}

impl From<McpError> for mcphub_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Config(msg) => mcphub_core::Error::Config(msg),
            McpError::ServerNotFound(name) => mcphub_core::Error::NotFound(name),
            other => mcphub_core::Error::Mcp(other.to_string()),
        }
    }
}
