//! MCP client implementation.
//!
//! An [`McpClient`] owns the connection to one server: it performs the
//! handshake, discovers the server's tools, resources and prompts, and
//! correlates requests with responses arriving on a background task.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{McpError, TransportError};
use crate::protocol::{
    methods, CallToolParams, CallToolResult, GetPromptResult, Implementation, IncomingMessage,
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, ReadResourceResult, MCP_PROTOCOL_VERSION,
};
use crate::transport::{create_transport, MessageStream, Transport, TransportFactory};
use crate::types::{
    ClientStatus, ConnectionStatus, Prompt, Resource, ServerConfig, ServerInfo, Tool, ToolResult,
};

/// Default time to wait for the response to a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on pages fetched for one list request.
const MAX_LIST_PAGES: usize = 64;

/// Options shared by every client of a host.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Time to wait for the response to a single request.
    pub request_timeout: Duration,
    /// Identity announced during the handshake.
    pub client_info: Implementation,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client_info: Implementation::default(),
        }
    }
}

impl ClientOptions {
    /// Options derived from the application configuration.
    pub fn from_config(config: &mcphub_core::Config) -> Self {
        Self::default()
            .with_request_timeout(Duration::from_secs(config.limits.request_timeout_secs))
            .with_client_name(&config.general.client_name)
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the client name announced to servers.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_info.name = name.into();
        self
    }
}

type ResponseSlot = oneshot::Sender<Result<Value, McpError>>;

/// Capability category of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Category {
    Tools,
    Resources,
    Prompts,
}

impl Category {
    fn list_method(self) -> &'static str {
        match self {
            Self::Tools => methods::TOOLS_LIST,
            Self::Resources => methods::RESOURCES_LIST,
            Self::Prompts => methods::PROMPTS_LIST,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Resources => "resources",
            Self::Prompts => "prompts",
        }
    }
}

#[derive(Default)]
struct ClientState {
    status: ConnectionStatus,
    connected_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    server_info: Option<ServerInfo>,
    tools: BTreeMap<String, Tool>,
    resources: BTreeMap<String, Resource>,
    prompts: BTreeMap<String, Prompt>,
    pending: HashMap<u64, ResponseSlot>,
    /// Bumped whenever a connection is torn down; work tagged with an older
    /// epoch is discarded.
    epoch: u64,
    /// Bumped on every list-changed notification of a category.
    revisions: HashMap<Category, u64>,
    /// Latest rediscovery task per category.
    refreshes: HashMap<Category, JoinHandle<()>>,
    transport: Option<Arc<dyn Transport>>,
    reader: Option<JoinHandle<()>>,
}

impl ClientState {
    fn is_live(&self) -> bool {
        matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        )
    }

    fn clear_category(&mut self, category: Category) {
        match category {
            Category::Tools => self.tools.clear(),
            Category::Resources => self.resources.clear(),
            Category::Prompts => self.prompts.clear(),
        }
    }

    fn revision(&self, category: Category) -> u64 {
        self.revisions.get(&category).copied().unwrap_or(0)
    }
}

/// The connection and list revision a discovery result belongs to.
#[derive(Debug, Clone, Copy)]
struct Stamp {
    epoch: u64,
    revision: u64,
}

/// Resources of a connection that has been invalidated.
struct Detached {
    epoch: u64,
    transport: Option<Arc<dyn Transport>>,
    reader: Option<JoinHandle<()>>,
    refreshes: Vec<JoinHandle<()>>,
    pending: HashMap<u64, ResponseSlot>,
}

impl Detached {
    async fn release(self) -> Result<(), TransportError> {
        for refresh in self.refreshes {
            refresh.abort();
        }
        for (_, slot) in self.pending {
            let _ = slot.send(Err(McpError::Disconnected));
        }

        let closed = match self.transport {
            Some(transport) => transport.close().await,
            None => Ok(()),
        };

        if let Some(reader) = self.reader {
            reader.abort();
            let _ = reader.await;
        }

        closed
    }
}

/// State shared between the client handle and its background tasks.
struct Shared {
    name: String,
    options: ClientOptions,
    state: Mutex<ClientState>,
    next_id: AtomicU64,
}

/// Removes a pending slot however the request ends.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.state.lock().pending.remove(&self.id);
    }
}

impl Shared {
    fn detach(&self, status: ConnectionStatus, error_message: Option<String>) -> Detached {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.status = status;
        state.error_message = error_message;
        state.connected_at = None;
        state.server_info = None;
        state.tools.clear();
        state.resources.clear();
        state.prompts.clear();

        Detached {
            epoch: state.epoch,
            transport: state.transport.take(),
            reader: state.reader.take(),
            refreshes: state.refreshes.drain().map(|(_, task)| task).collect(),
            pending: std::mem::take(&mut state.pending),
        }
    }

    /// Send a request and wait for the correlated response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let (slot, response) = oneshot::channel();
        let (id, transport) = {
            let mut state = self.state.lock();
            if !state.is_live() {
                return Err(McpError::NotConnected);
            }
            let transport = state.transport.clone().ok_or(McpError::NotConnected)?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            state.pending.insert(id, slot);
            (id, transport)
        };
        let _guard = PendingGuard { shared: self, id };

        let message = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        debug!(server = %self.name, method, id, "Sending request");
        transport.send(&message).await?;

        match tokio::time::timeout(self.options.request_timeout, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Disconnected),
            Err(_) => {
                warn!(server = %self.name, method, id, "Request timed out");
                Err(McpError::Timeout {
                    method: method.to_string(),
                    seconds: self.options.request_timeout.as_secs(),
                })
            }
        }
    }

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let transport = self
            .state
            .lock()
            .transport
            .clone()
            .ok_or(McpError::NotConnected)?;

        let message = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        debug!(server = %self.name, method, "Sending notification");
        transport.send(&message).await?;
        Ok(())
    }

    /// Fetch every page of a list method.
    async fn fetch_list<T: DeserializeOwned>(&self, category: Category) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page = self.request(category.list_method(), params).await?;

            if let Some(entries) = page.get(category.key()).and_then(Value::as_array) {
                for entry in entries {
                    match serde_json::from_value::<T>(entry.clone()) {
                        Ok(item) => items.push(item),
                        Err(e) => warn!(
                            server = %self.name,
                            category = category.key(),
                            error = %e,
                            "Skipping malformed list entry"
                        ),
                    }
                }
            }

            let next = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            match next {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        warn!(server = %self.name, category = category.key(), "List pagination limit reached");
        Ok(items)
    }

    /// Replace one category with a fresh listing from the server.
    ///
    /// On failure the category is left empty.
    async fn discover(&self, category: Category, epoch: u64) -> Result<usize, McpError> {
        let revision = self.state.lock().revision(category);
        self.discover_at(category, Stamp { epoch, revision }).await
    }

    async fn discover_at(&self, category: Category, stamp: Stamp) -> Result<usize, McpError> {
        let result = match category {
            Category::Tools => self.fetch_list::<Tool>(category).await.map(|tools| {
                self.store_listing(category, stamp, |state| {
                    state.tools = tools.into_iter().map(|t| (t.name.clone(), t)).collect();
                    state.tools.len()
                })
            }),
            Category::Resources => self.fetch_list::<Resource>(category).await.map(|resources| {
                self.store_listing(category, stamp, |state| {
                    state.resources = resources.into_iter().map(|r| (r.uri.clone(), r)).collect();
                    state.resources.len()
                })
            }),
            Category::Prompts => self.fetch_list::<Prompt>(category).await.map(|prompts| {
                self.store_listing(category, stamp, |state| {
                    state.prompts = prompts.into_iter().map(|p| (p.name.clone(), p)).collect();
                    state.prompts.len()
                })
            }),
        };

        match result {
            Ok(count) => {
                debug!(server = %self.name, category = category.key(), count, "Discovered");
                Ok(count)
            }
            Err(e) => {
                self.store_listing(category, stamp, |state| {
                    state.clear_category(category);
                    0
                });
                Err(e)
            }
        }
    }

    /// Discovery of a category the server may not implement.
    async fn discover_optional(&self, category: Category, epoch: u64) -> Result<(), McpError> {
        let advertised = {
            let state = self.state.lock();
            state
                .server_info
                .as_ref()
                .and_then(|info| info.capabilities.as_ref())
                .map(|caps| match category {
                    Category::Tools => caps.tools.is_some(),
                    Category::Resources => caps.resources.is_some(),
                    Category::Prompts => caps.prompts.is_some(),
                })
                .unwrap_or(true)
        };

        if !advertised {
            debug!(server = %self.name, category = category.key(), "Capability not advertised, skipping");
            return Ok(());
        }

        match self.discover(category, epoch).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_server_error() => {
                info!(
                    server = %self.name,
                    category = category.key(),
                    error = %e,
                    "Server does not support listing, treating as empty"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply `update` unless the connection it belongs to is gone.
    fn store(&self, epoch: u64, update: impl FnOnce(&mut ClientState) -> usize) -> usize {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(server = %self.name, "Discarding result of a previous connection");
            return 0;
        }
        update(&mut state)
    }

    /// Apply a listing unless its connection is gone or a newer refresh superseded it.
    fn store_listing(
        &self,
        category: Category,
        stamp: Stamp,
        update: impl FnOnce(&mut ClientState) -> usize,
    ) -> usize {
        let mut state = self.state.lock();
        if state.epoch != stamp.epoch || state.revision(category) != stamp.revision {
            debug!(server = %self.name, category = category.key(), "Discarding superseded listing");
            return 0;
        }
        update(&mut state)
    }

    async fn dispatch(self: &Arc<Self>, frame: &str, epoch: u64) {
        match IncomingMessage::parse(frame) {
            Ok(IncomingMessage::Response(response)) => self.resolve(response),
            Ok(IncomingMessage::Notification(notification)) => {
                self.handle_notification(notification, epoch)
            }
            Ok(IncomingMessage::Request(request)) => self.reject_request(request).await,
            Err(e) => warn!(server = %self.name, error = %e, "Dropping malformed message"),
        }
    }

    fn resolve(&self, response: JsonRpcResponse) {
        let slot = response
            .id
            .as_u64()
            .and_then(|id| self.state.lock().pending.remove(&id));

        let Some(slot) = slot else {
            debug!(server = %self.name, id = %response.id, "Discarding response with unknown id");
            return;
        };

        let outcome = match response.error {
            Some(err) => Err(McpError::server_error(err.code, err.message, err.data)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = slot.send(outcome);
    }

    fn handle_notification(self: &Arc<Self>, notification: JsonRpcNotification, epoch: u64) {
        let category = match notification.method.as_str() {
            methods::TOOLS_LIST_CHANGED | "tools/list_changed" => Category::Tools,
            methods::RESOURCES_LIST_CHANGED | "resources/list_changed" => Category::Resources,
            methods::PROMPTS_LIST_CHANGED | "prompts/list_changed" => Category::Prompts,
            methods::LOG_MESSAGE => {
                self.log_server_message(notification.params.as_ref());
                return;
            }
            other => {
                debug!(server = %self.name, method = other, "Ignoring notification");
                return;
            }
        };

        info!(server = %self.name, category = category.key(), "Server list changed, refreshing");

        let (stamp, previous) = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            let revision = {
                let revision = state.revisions.entry(category).or_insert(0);
                *revision += 1;
                *revision
            };
            (Stamp { epoch, revision }, state.refreshes.remove(&category))
        };
        if let Some(previous) = previous {
            previous.abort();
        }

        // Off the inbound task, which must keep delivering the responses
        let shared = Arc::clone(self);
        let task = tokio::spawn(async move {
            if let Err(e) = shared.discover_at(category, stamp).await {
                warn!(server = %shared.name, category = category.key(), error = %e, "Refresh failed");
            }
        });

        let mut state = self.state.lock();
        if state.epoch == epoch {
            state.refreshes.insert(category, task);
        } else {
            task.abort();
        }
    }

    fn log_server_message(&self, params: Option<&Value>) {
        let params = params.cloned().unwrap_or(Value::Null);
        let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
        let logger = params.get("logger").and_then(Value::as_str).unwrap_or_default();
        let data = match params.get("data") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        match level {
            "debug" => debug!(server = %self.name, logger, "{}", data),
            "warning" => warn!(server = %self.name, logger, "{}", data),
            "error" | "critical" | "alert" | "emergency" => {
                error!(server = %self.name, logger, "{}", data)
            }
            _ => info!(server = %self.name, logger, "{}", data),
        }
    }

    async fn reject_request(&self, request: JsonRpcRequest) {
        debug!(server = %self.name, method = %request.method, "Rejecting server request");

        let response = JsonRpcResponse::<Value>::failure(
            request.id,
            JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("method not supported by client: {}", request.method),
            ),
        );

        let transport = self.state.lock().transport.clone();
        let Some(transport) = transport else {
            return;
        };

        match serde_json::to_string(&response) {
            Ok(message) => {
                if let Err(e) = transport.send(&message).await {
                    warn!(server = %self.name, error = %e, "Failed to answer server request");
                }
            }
            Err(e) => warn!(server = %self.name, error = %e, "Failed to encode response"),
        }
    }

    fn inbound_finished(&self, epoch: u64, failure: Option<String>) {
        let (reason, pending) = {
            let mut state = self.state.lock();
            if state.epoch != epoch || !state.is_live() {
                return;
            }
            let reason = failure.unwrap_or_else(|| "connection closed by server".to_string());
            state.status = ConnectionStatus::Error;
            state.error_message = Some(reason.clone());
            state.connected_at = None;
            (reason, std::mem::take(&mut state.pending))
        };

        error!(server = %self.name, error = %reason, "MCP connection lost");
        for (_, slot) in pending {
            let _ = slot.send(Err(McpError::Transport(TransportError::ConnectionClosed)));
        }
    }
}

async fn run_inbound(shared: Arc<Shared>, mut inbound: MessageStream, epoch: u64) {
    let failure = loop {
        match inbound.next().await {
            Some(Ok(frame)) => shared.dispatch(&frame, epoch).await,
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        }
    };

    shared.inbound_finished(epoch, failure);
}

/// A connection to a single MCP server.
pub struct McpClient {
    shared: Arc<Shared>,
    config: ServerConfig,
    factory: TransportFactory,
    /// Serializes connect and disconnect.
    lifecycle: tokio::sync::Mutex<()>,
}

impl McpClient {
    /// Create a disconnected client with default options.
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        Self::with_options(name, config, ClientOptions::default())
    }

    /// Create a disconnected client.
    pub fn with_options(name: impl Into<String>, config: ServerConfig, options: ClientOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                options,
                state: Mutex::new(ClientState::default()),
                next_id: AtomicU64::new(1),
            }),
            config,
            factory: Arc::new(create_transport),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Use a custom transport factory.
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Connect using a transport built from the server configuration.
    pub async fn connect(&self) -> Result<(), McpError> {
        let transport = (self.factory)(self.name(), &self.config);
        self.connect_inner(transport).await
    }

    /// Connect over an already constructed, unstarted transport.
    pub async fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<(), McpError> {
        self.connect_inner(Ok(transport)).await
    }

    async fn connect_inner(
        &self,
        transport: Result<Arc<dyn Transport>, TransportError>,
    ) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let state = self.shared.state.lock();
            if state.is_live() {
                return Err(McpError::invalid_state("disconnected", state.status.to_string()));
            }
        }

        // A connection that failed in the background may still hold its transport
        let previous = self.shared.detach(ConnectionStatus::Connecting, None);
        let epoch = previous.epoch;
        if let Err(e) = previous.release().await {
            warn!(server = %self.name(), error = %e, "Failed to close previous transport");
        }

        info!(
            server = %self.name(),
            transport = %self.config.transport_type,
            "Connecting to MCP server"
        );

        let result = match transport {
            Ok(transport) => self.establish(transport, epoch).await,
            Err(e) => Err(e.into()),
        };
        let result = result.and_then(|()| self.promote(epoch));

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = e.to_string();
                error!(server = %self.name(), error = %reason, "Failed to connect to MCP server");
                let detached = self
                    .shared
                    .detach(ConnectionStatus::Error, Some(reason.clone()));
                if let Err(close_err) = detached.release().await {
                    warn!(server = %self.name(), error = %close_err, "Failed to close transport");
                }
                Err(McpError::connection_failed(self.name(), reason))
            }
        }
    }

    async fn establish(&self, transport: Arc<dyn Transport>, epoch: u64) -> Result<(), McpError> {
        // Stored first so every failure below closes it
        self.shared.state.lock().transport = Some(Arc::clone(&transport));

        transport.start().await?;
        let inbound = transport.receive()?;
        let reader = tokio::spawn(run_inbound(Arc::clone(&self.shared), inbound, epoch));
        self.shared.state.lock().reader = Some(reader);

        self.handshake(epoch).await?;

        self.shared.discover(Category::Tools, epoch).await?;
        self.shared.discover_optional(Category::Resources, epoch).await?;
        self.shared.discover_optional(Category::Prompts, epoch).await?;
        Ok(())
    }

    async fn handshake(&self, epoch: u64) -> Result<(), McpError> {
        let params = InitializeParams::new(self.shared.options.client_info.clone());
        let result = self
            .shared
            .request(methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("invalid initialize result: {}", e)))?;

        let info = ServerInfo {
            name: result.server_info.name,
            version: result.server_info.version,
            protocol_version: result
                .protocol_version
                .unwrap_or_else(|| MCP_PROTOCOL_VERSION.to_string()),
            capabilities: result.capabilities,
        };

        info!(
            server = %self.name(),
            server_name = %info.name,
            server_version = %info.version,
            protocol_version = %info.protocol_version,
            "MCP connection initialized"
        );

        self.shared.store(epoch, |state| {
            state.server_info = Some(info);
            0
        });

        self.shared.notify(methods::INITIALIZED, None).await
    }

    fn promote(&self, epoch: u64) -> Result<(), McpError> {
        let mut state = self.shared.state.lock();
        if state.epoch != epoch || state.status != ConnectionStatus::Connecting {
            let reason = state
                .error_message
                .clone()
                .unwrap_or_else(|| "connection lost during handshake".to_string());
            return Err(McpError::protocol(reason));
        }

        state.status = ConnectionStatus::Connected;
        state.connected_at = Some(Utc::now());
        state.error_message = None;

        info!(
            server = %self.shared.name,
            tools = state.tools.len(),
            resources = state.resources.len(),
            prompts = state.prompts.len(),
            "Connected to MCP server"
        );
        Ok(())
    }

    /// Close the connection and forget everything discovered.
    ///
    /// Pending requests fail with [`McpError::Disconnected`]. Disconnecting
    /// a disconnected client is a no-op.
    pub async fn disconnect(&self) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;

        let was = self.connection_status();
        let detached = self.shared.detach(ConnectionStatus::Disconnected, None);
        let result = detached.release().await;

        if was != ConnectionStatus::Disconnected {
            info!(server = %self.name(), "Disconnected from MCP server");
        }
        result.map_err(McpError::from)
    }

    fn ensure_connected(&self) -> Result<(), McpError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(McpError::NotConnected)
        }
    }

    /// Call a tool on the server.
    ///
    /// Failures of the call itself are reported in the returned
    /// [`ToolResult`]; only an unknown tool or a missing connection are
    /// returned as errors.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, McpError> {
        self.ensure_connected()?;
        if !self.has_tool(name) {
            return Err(McpError::ToolNotFound(name.to_string()));
        }

        let call_id = Uuid::new_v4().to_string();
        let arguments = if arguments.is_null() {
            Value::Object(Map::new())
        } else {
            arguments
        };

        debug!(server = %self.name(), tool = name, call_id = %call_id, "Calling tool");

        let outcome = self
            .shared
            .request(
                methods::TOOLS_CALL,
                Some(serde_json::to_value(CallToolParams {
                    name: name.to_string(),
                    arguments,
                })?),
            )
            .await
            .and_then(|value| {
                serde_json::from_value::<CallToolResult>(value)
                    .map_err(|e| McpError::protocol(format!("invalid tool result: {}", e)))
            });

        let result = match outcome {
            Ok(result) if result.is_error => {
                ToolResult::tool_error(call_id, result.content.to_text())
            }
            Ok(result) => ToolResult::success(call_id, result.content.to_text()),
            Err(e) => {
                warn!(server = %self.name(), tool = name, error = %e, "Tool call failed");
                ToolResult::failure(call_id, &e)
            }
        };

        Ok(result)
    }

    /// Read a resource advertised by the server.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.ensure_connected()?;
        if !self.has_resource(uri) {
            return Err(McpError::ResourceNotFound(uri.to_string()));
        }

        let value = self
            .shared
            .request(methods::RESOURCES_READ, Some(json!({ "uri": uri })))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("invalid resource contents: {}", e)))
    }

    /// Render a prompt, returning its message contents joined by newlines.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<String, McpError> {
        self.ensure_connected()?;
        if !self.has_prompt(name) {
            return Err(McpError::PromptNotFound(name.to_string()));
        }

        let value = self
            .shared
            .request(
                methods::PROMPTS_GET,
                Some(json!({ "name": name, "arguments": arguments.unwrap_or_default() })),
            )
            .await?;
        let result: GetPromptResult = serde_json::from_value(value)
            .map_err(|e| McpError::protocol(format!("invalid prompt result: {}", e)))?;
        Ok(result.text())
    }

    /// Re-run tool discovery.
    pub async fn refresh_tools(&self) -> Result<usize, McpError> {
        self.ensure_connected()?;
        let epoch = self.shared.state.lock().epoch;
        self.shared.discover(Category::Tools, epoch).await
    }

    /// Snapshot of the client state.
    pub fn status(&self) -> ClientStatus {
        let state = self.shared.state.lock();
        ClientStatus {
            server_name: self.shared.name.clone(),
            status: state.status,
            connected_at: state.connected_at,
            error_message: state.error_message.clone(),
            tools_count: state.tools.len(),
            resources_count: state.resources.len(),
            prompts_count: state.prompts.len(),
        }
    }

    /// Current connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.state.lock().status
    }

    /// Check if the client is connected.
    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    /// Server information from the handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared.state.lock().server_info.clone()
    }

    /// Discovered tools, sorted by name.
    pub fn tools(&self) -> Vec<Tool> {
        self.shared.state.lock().tools.values().cloned().collect()
    }

    /// Discovered resources, sorted by URI.
    pub fn resources(&self) -> Vec<Resource> {
        self.shared.state.lock().resources.values().cloned().collect()
    }

    /// Discovered prompts, sorted by name.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.shared.state.lock().prompts.values().cloned().collect()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.shared.state.lock().tools.contains_key(name)
    }

    pub fn has_resource(&self, uri: &str) -> bool {
        self.shared.state.lock().resources.contains_key(uri)
    }

    pub fn has_prompt(&self, name: &str) -> bool {
        self.shared.state.lock().prompts.contains_key(name)
    }

    /// Tools keyed by their `server__tool` name.
    pub fn namespaced_tools(&self) -> BTreeMap<String, Tool> {
        self.shared
            .state
            .lock()
            .tools
            .values()
            .map(|tool| (tool.namespaced_name(&self.shared.name), tool.clone()))
            .collect()
    }

    /// Prompts keyed by their `server__prompt` name.
    pub fn namespaced_prompts(&self) -> BTreeMap<String, Prompt> {
        self.shared
            .state
            .lock()
            .prompts
            .values()
            .map(|prompt| (prompt.namespaced_name(&self.shared.name), prompt.clone()))
            .collect()
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        // The inbound task holds the shared state, and with it the transport
        if let Some(reader) = self.shared.state.lock().reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.shared.name)
            .field("status", &self.connection_status())
            .finish()
    }
}
