//! MCP transport abstraction.
//!
//! A transport moves complete JSON-RPC messages between the client and one
//! server. Two implementations exist: [`StdioTransport`] spawns a child
//! process and talks newline-delimited JSON over its pipes, and
//! [`SseTransport`] subscribes to a server-sent event stream and posts
//! outbound messages over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportError;
use crate::event_stream::SseTransport;
use crate::stdio::StdioTransport;
use crate::types::{ServerConfig, TransportKind};

/// Inbound messages of a transport, one complete frame per item.
///
/// The stream ends without an error item on orderly close.
pub type MessageStream = BoxStream<'static, Result<String, TransportError>>;

/// Trait for MCP transport implementations.
///
/// All methods take `&self` so one transport can be shared between the
/// task sending requests and the task reading responses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the channel. Starting twice is an error.
    async fn start(&self) -> Result<(), TransportError>;

    /// Send one complete message to the server.
    async fn send(&self, message: &str) -> Result<(), TransportError>;

    /// Take the inbound message stream. Only the first call succeeds.
    fn receive(&self) -> Result<MessageStream, TransportError>;

    /// Tear the channel down. Safe to call repeatedly.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Builds the transport for a named server.
pub type TransportFactory =
    Arc<dyn Fn(&str, &ServerConfig) -> Result<Arc<dyn Transport>, TransportError> + Send + Sync>;

/// Default grace period a child process gets between SIGTERM and kill.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Create the transport selected by the config's transport kind.
pub fn create_transport(
    server_name: &str,
    config: &ServerConfig,
) -> Result<Arc<dyn Transport>, TransportError> {
    build_transport(server_name, config, DEFAULT_SHUTDOWN_GRACE)
}

/// Factory using [`create_transport`] with a custom shutdown grace period.
pub fn transport_factory(shutdown_grace: Duration) -> TransportFactory {
    Arc::new(move |name: &str, config: &ServerConfig| {
        build_transport(name, config, shutdown_grace)
    })
}

fn build_transport(
    server_name: &str,
    config: &ServerConfig,
    shutdown_grace: Duration,
) -> Result<Arc<dyn Transport>, TransportError> {
    match config.transport_type {
        TransportKind::Stdio => Ok(Arc::new(
            StdioTransport::from_config(server_name, config)?.with_grace_period(shutdown_grace),
        )),
        TransportKind::Sse => Ok(Arc::new(SseTransport::from_config(server_name, config)?)),
    }
}
