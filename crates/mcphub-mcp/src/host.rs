//! Multi-server host.
//!
//! [`McpHost`] owns one [`McpClient`] per enabled server, aggregates what
//! the connected servers expose under `server__name` identifiers and
//! routes calls back to the right client.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::client::{ClientOptions, McpClient};
use crate::error::McpError;
use crate::protocol::ReadResourceResult;
use crate::tools::parse_namespaced;
use crate::transport::{create_transport, transport_factory, TransportFactory};
use crate::types::{ClientStatus, Prompt, Resource, ServerConfig, Tool, ToolResult};

/// Manages the clients of every configured MCP server.
pub struct McpHost {
    configs: RwLock<BTreeMap<String, ServerConfig>>,
    clients: RwLock<BTreeMap<String, Arc<McpClient>>>,
    /// Held for the whole of every mutating operation.
    ops: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    options: ClientOptions,
    factory: TransportFactory,
}

impl McpHost {
    /// Create a host for the given servers. Nothing is connected yet.
    pub fn new(configs: BTreeMap<String, ServerConfig>) -> Self {
        Self {
            configs: RwLock::new(configs),
            clients: RwLock::new(BTreeMap::new()),
            ops: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
            options: ClientOptions::default(),
            factory: Arc::new(create_transport),
        }
    }

    /// Create a host whose timeouts and identity follow the application config.
    pub fn from_config(configs: BTreeMap<String, ServerConfig>, config: &mcphub_core::Config) -> Self {
        Self::new(configs)
            .with_options(ClientOptions::from_config(config))
            .with_transport_factory(transport_factory(Duration::from_secs(
                config.limits.shutdown_grace_secs,
            )))
    }

    /// Set the options used for every client.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom transport factory for every client.
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.factory = factory;
        self
    }

    fn build_client(&self, name: &str, config: &ServerConfig) -> Arc<McpClient> {
        Arc::new(
            McpClient::with_options(name, config.clone(), self.options.clone())
                .with_transport_factory(Arc::clone(&self.factory)),
        )
    }

    /// Connect every enabled server concurrently.
    ///
    /// Individual failures are logged and recorded on the client status;
    /// this never fails. Calling it again is a no-op.
    pub async fn initialize(&self) {
        let _ops = self.ops.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            debug!("MCP host already initialized");
            return;
        }

        let configs = self.configs.read().clone();
        info!(count = configs.len(), "Initializing MCP host");

        let mut to_connect = Vec::new();
        {
            let mut clients = self.clients.write();
            for (name, config) in &configs {
                if !config.enabled {
                    info!(server = %name, "Skipping disabled server");
                    continue;
                }
                let client = clients
                    .entry(name.clone())
                    .or_insert_with(|| self.build_client(name, config));
                if !client.is_connected() {
                    to_connect.push(Arc::clone(client));
                }
            }
        }

        let results = join_all(to_connect.iter().map(|client| async move {
            (client.name().to_string(), client.connect().await)
        }))
        .await;

        let mut failed = 0;
        for (name, result) in results {
            if let Err(e) = result {
                error!(server = %name, error = %e, "Failed to connect to MCP server");
                failed += 1;
            }
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            connected = self.connected_servers().len(),
            failed,
            "MCP host initialized"
        );
    }

    /// Disconnect every client and forget them.
    pub async fn shutdown(&self) {
        let _ops = self.ops.lock().await;

        let clients: Vec<Arc<McpClient>> = std::mem::take(&mut *self.clients.write())
            .into_values()
            .collect();
        if !clients.is_empty() {
            info!(count = clients.len(), "Shutting down MCP host");
        }

        let results = join_all(clients.iter().map(|client| async move {
            (client.name().to_string(), client.disconnect().await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                warn!(server = %name, error = %e, "Error while disconnecting MCP server");
            }
        }

        self.initialized.store(false, Ordering::SeqCst);
    }

    fn connected_clients(&self) -> Vec<Arc<McpClient>> {
        self.clients
            .read()
            .values()
            .filter(|client| client.is_connected())
            .cloned()
            .collect()
    }

    /// Tools of every connected server, keyed by `server__tool`.
    pub fn get_all_tools(&self) -> BTreeMap<String, Tool> {
        self.connected_clients()
            .iter()
            .flat_map(|client| client.namespaced_tools())
            .collect()
    }

    /// Resources of every connected server, keyed by URI.
    pub fn get_all_resources(&self) -> BTreeMap<String, Resource> {
        self.connected_clients()
            .iter()
            .flat_map(|client| client.resources())
            .map(|resource| (resource.uri.clone(), resource))
            .collect()
    }

    /// Prompts of every connected server, keyed by `server__prompt`.
    pub fn get_all_prompts(&self) -> BTreeMap<String, Prompt> {
        self.connected_clients()
            .iter()
            .flat_map(|client| client.namespaced_prompts())
            .collect()
    }

    /// Resolve `server__name` to a connected client and the bare name.
    fn route<'a>(&self, namespaced: &'a str) -> Result<(Arc<McpClient>, &'a str), McpError> {
        let (server, name) = parse_namespaced(namespaced)
            .ok_or_else(|| McpError::InvalidToolName(namespaced.to_string()))?;

        let client = self.clients.read().get(server).cloned();
        let Some(client) = client else {
            let disabled = self
                .configs
                .read()
                .get(server)
                .is_some_and(|config| !config.enabled);
            return Err(if disabled {
                McpError::ServerDisabled(server.to_string())
            } else {
                McpError::ServerNotFound(server.to_string())
            });
        };

        if !client.is_connected() {
            return Err(McpError::ServerNotConnected(server.to_string()));
        }
        Ok((client, name))
    }

    /// Call a tool by its namespaced name.
    pub async fn call_tool(&self, namespaced: &str, arguments: Value) -> Result<ToolResult, McpError> {
        let (client, tool) = self.route(namespaced)?;
        debug!(server = %client.name(), tool, "Routing tool call");
        client.call_tool(tool, arguments).await
    }

    /// Render a prompt by its namespaced name.
    pub async fn get_prompt(
        &self,
        namespaced: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<String, McpError> {
        let (client, prompt) = self.route(namespaced)?;
        client.get_prompt(prompt, arguments).await
    }

    /// Read a resource from whichever connected server advertises it.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        let client = self
            .connected_clients()
            .into_iter()
            .find(|client| client.has_resource(uri))
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))?;
        client.read_resource(uri).await
    }

    /// Status snapshot of every client.
    pub fn get_status(&self) -> BTreeMap<String, ClientStatus> {
        self.clients
            .read()
            .iter()
            .map(|(name, client)| (name.clone(), client.status()))
            .collect()
    }

    /// Names of the connected servers.
    pub fn connected_servers(&self) -> BTreeSet<String> {
        self.connected_clients()
            .iter()
            .map(|client| client.name().to_string())
            .collect()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn tool_count(&self) -> usize {
        self.get_all_tools().len()
    }

    pub fn resource_count(&self) -> usize {
        self.get_all_resources().len()
    }

    pub fn prompt_count(&self) -> usize {
        self.get_all_prompts().len()
    }

    /// The client of a server, if one exists.
    pub fn client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.clients.read().get(name).cloned()
    }

    /// Configuration of every known server.
    pub fn configs(&self) -> BTreeMap<String, ServerConfig> {
        self.configs.read().clone()
    }

    /// Register a new server, connecting it if the host is initialized.
    ///
    /// A failed connect is returned but the server stays registered.
    pub async fn add_server(&self, name: &str, config: ServerConfig) -> Result<(), McpError> {
        let _ops = self.ops.lock().await;

        if self.configs.read().contains_key(name) || self.clients.read().contains_key(name) {
            return Err(McpError::ServerAlreadyExists(name.to_string()));
        }

        info!(server = %name, "Adding MCP server");
        self.install(name, config).await
    }

    /// Store `config` and, when enabled, create and possibly connect its client.
    async fn install(&self, name: &str, config: ServerConfig) -> Result<(), McpError> {
        self.configs.write().insert(name.to_string(), config.clone());

        if !config.enabled {
            info!(server = %name, "Server is disabled, not connecting");
            return Ok(());
        }

        let client = self.build_client(name, &config);
        self.clients.write().insert(name.to_string(), Arc::clone(&client));

        if self.is_initialized() {
            client.connect().await?;
        }
        Ok(())
    }

    /// Disconnect and forget a server.
    pub async fn remove_server(&self, name: &str) -> Result<(), McpError> {
        let _ops = self.ops.lock().await;

        let config = self.configs.write().remove(name);
        let client = self.clients.write().remove(name);
        if config.is_none() && client.is_none() {
            return Err(McpError::ServerNotFound(name.to_string()));
        }

        info!(server = %name, "Removing MCP server");
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                warn!(server = %name, error = %e, "Error while disconnecting MCP server");
            }
        }
        Ok(())
    }

    /// Replace a server's configuration, rebuilding its client.
    pub async fn update_server(&self, name: &str, config: ServerConfig) -> Result<(), McpError> {
        let _ops = self.ops.lock().await;

        if !self.configs.read().contains_key(name) && !self.clients.read().contains_key(name) {
            return Err(McpError::ServerNotFound(name.to_string()));
        }

        info!(server = %name, "Updating MCP server");
        let previous = self.clients.write().remove(name);
        if let Some(client) = previous {
            if let Err(e) = client.disconnect().await {
                warn!(server = %name, error = %e, "Error while disconnecting MCP server");
            }
        }

        self.install(name, config).await
    }

    /// Disconnect and connect a server again.
    pub async fn reconnect(&self, name: &str) -> Result<(), McpError> {
        let _ops = self.ops.lock().await;

        let client = self
            .client(name)
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;

        info!(server = %name, "Reconnecting MCP server");
        if let Err(e) = client.disconnect().await {
            warn!(server = %name, error = %e, "Error while disconnecting MCP server");
        }
        client.connect().await
    }
}

impl std::fmt::Debug for McpHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHost")
            .field("servers", &self.configs.read().keys().collect::<Vec<_>>())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
