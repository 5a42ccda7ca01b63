//! # mcphub-mcp
//!
//! Host-side MCP (Model Context Protocol) client.
//!
//! This crate provides:
//! - stdio (child process) and server-sent event transports
//! - JSON-RPC wire types and an MCP client with request correlation
//! - A multi-server host that aggregates tools, resources and prompts
//! - Loading of server definitions from JSON or TOML
//! - Conversion of tools into LLM function specifications

pub mod client;
pub mod error;
pub mod event_stream;
pub mod host;
pub mod loader;
pub mod protocol;
pub mod sse;
pub mod stdio;
pub mod tools;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::{ClientOptions, McpClient};
pub use error::{McpError, TransportError};
pub use event_stream::SseTransport;
pub use host::McpHost;
pub use loader::{command_exists, ConfigFormat, ConfigLoader};
pub use stdio::StdioTransport;
pub use tools::{format_tool_result, parse_namespaced, to_function_specs, ToolFormat};
pub use transport::{create_transport, Transport, TransportFactory};
pub use types::{
    ClientStatus, ConnectionStatus, Prompt, PromptArgument, Resource, ServerConfig, ServerInfo,
    Tool, ToolOutput, ToolResult, TransportKind,
};
