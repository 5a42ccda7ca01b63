//! In-process test doubles: a channel-backed transport wired to a scripted
//! MCP server task.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::error::TransportError;
use crate::transport::{MessageStream, Transport};

type Inbound = Result<String, TransportError>;

/// Transport whose far end is a task inside the test process.
pub(crate) struct ChannelTransport {
    to_server: Mutex<Option<mpsc::UnboundedSender<String>>>,
    to_client: mpsc::UnboundedSender<Inbound>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_rx: Mutex<Option<oneshot::Receiver<()>>>,
    started: AtomicBool,
    connected: AtomicBool,
    fail_sends: AtomicBool,
}

impl ChannelTransport {
    fn new(
        to_server: mpsc::UnboundedSender<String>,
        to_client: mpsc::UnboundedSender<Inbound>,
        inbound: mpsc::UnboundedReceiver<Inbound>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Self {
            to_server: Mutex::new(Some(to_server)),
            to_client,
            inbound: Mutex::new(Some(inbound)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
            started: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Make every following send fail.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// End the inbound stream as if the server closed the channel.
    pub fn hang_up(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Deliver a read error on the inbound stream.
    pub fn fail_reads(&self) {
        let _ = self.to_client.send(Err(TransportError::ConnectionClosed));
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::WriteError(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }

        let guard = self.to_server.lock();
        let sender = guard.as_ref().ok_or(TransportError::NotConnected)?;
        sender
            .send(message.to_string())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn receive(&self) -> Result<MessageStream, TransportError> {
        let inbound = self.inbound.lock().take();
        let shutdown = self.shutdown_rx.lock().take();
        let (Some(inbound), Some(shutdown)) = (inbound, shutdown) else {
            return Err(TransportError::NotConnected);
        };

        let stream = futures::stream::unfold(inbound, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });
        Ok(stream.take_until(shutdown).boxed())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.to_server.lock().take();
        self.hang_up();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MockState {
    tools: Vec<Value>,
    /// `None` answers the list method with "method not found".
    resources: Option<Vec<Value>>,
    prompts: Option<Vec<Value>>,
    tools_only: bool,
    failing: HashSet<String>,
    page_size: Option<usize>,
    /// Number of upcoming requests per method left unanswered.
    stalled: HashMap<String, usize>,
    /// Tool call replies are buffered until this many are held.
    hold_calls: usize,
    held: Vec<Value>,
    received: Vec<Value>,
    outbound: Option<mpsc::UnboundedSender<Inbound>>,
}

fn error_reply(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

impl MockState {
    fn page(&self, key: &str, items: &[Value], params: &Value) -> Value {
        let offset = params
            .get("cursor")
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let size = self.page_size.unwrap_or(items.len().max(1));
        let end = (offset + size).min(items.len());

        let mut page = json!({ key: items[offset.min(end)..end] });
        if end < items.len() {
            page["nextCursor"] = json!(end.to_string());
        }
        page
    }

    /// Replies to send for `message`, in wire order.
    fn replies_for(&mut self, message: &Value) -> Vec<Value> {
        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        if message.get("id").is_some() {
            if let Some(left) = self.stalled.get_mut(method).filter(|left| **left > 0) {
                *left -= 1;
                return Vec::new();
            }
        }

        let is_call = method == "tools/call";
        let Some(reply) = self.reply_to(message) else {
            return Vec::new();
        };
        if !is_call || self.hold_calls == 0 {
            return vec![reply];
        }

        self.held.push(reply);
        if self.held.len() < self.hold_calls {
            return Vec::new();
        }
        let mut held = std::mem::take(&mut self.held);
        held.reverse();
        held
    }

    fn reply_to(&self, message: &Value) -> Option<Value> {
        let id = message.get("id")?.clone();
        let method = message.get("method")?.as_str()?;
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        if self.failing.contains(method) {
            return Some(error_reply(id, -32603, "internal failure"));
        }

        let result = match method {
            "initialize" => {
                let capabilities = if self.tools_only {
                    json!({"tools": {"listChanged": true}})
                } else {
                    json!({"tools": {"listChanged": true}, "resources": {}, "prompts": {}})
                };
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": capabilities,
                    "serverInfo": {"name": "mock-server", "version": "1.0.0"}
                })
            }
            "tools/list" => self.page("tools", &self.tools, &params),
            "resources/list" => match self.resources {
                Some(ref resources) => self.page("resources", resources, &params),
                None => return Some(error_reply(id, -32601, "Method not found")),
            },
            "prompts/list" => match self.prompts {
                Some(ref prompts) => self.page("prompts", prompts, &params),
                None => return Some(error_reply(id, -32601, "Method not found")),
            },
            "tools/call" => {
                let arguments = &params["arguments"];
                match params["name"].as_str().unwrap_or_default() {
                    "slow" => return None,
                    "say" => json!({"content": [{"type": "text", "text": arguments["text"]}]}),
                    "fail" => return Some(error_reply(id, -32000, "tool exploded")),
                    "flagged" => json!({"content": "bad input", "isError": true}),
                    "multi" => json!({"content": [
                        {"type": "text", "text": "first"},
                        {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                        {"type": "text", "text": "last"}
                    ]}),
                    _ => json!({"content": "ok"}),
                }
            }
            "resources/read" => {
                let uri = params["uri"].as_str().unwrap_or_default();
                json!({"contents": [{"uri": uri, "text": format!("contents of {}", uri)}]})
            }
            "prompts/get" => {
                let name = params["arguments"]["name"].as_str().unwrap_or("stranger");
                json!({"messages": [
                    {"role": "user", "content": {"type": "text", "text": format!("Hello {}", name)}},
                    {"role": "assistant", "content": "How can I help?"}
                ]})
            }
            _ => return Some(error_reply(id, -32601, "Method not found")),
        };

        Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
    }
}

/// Scripted MCP server running as a task of the test runtime.
///
/// Tools answer by name: `say` echoes its `text` argument, `fail` returns a
/// JSON-RPC error, `flagged` sets `isError`, `multi` returns mixed content
/// blocks and `slow` never answers.
#[derive(Clone)]
pub(crate) struct MockServer {
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub fn new() -> Self {
        let state = MockState {
            resources: Some(Vec::new()),
            prompts: Some(Vec::new()),
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_tool(self, name: &str, description: &str) -> Self {
        self.add_tool(name, description);
        self
    }

    pub fn with_resource(self, uri: &str, name: &str) -> Self {
        if let Some(ref mut resources) = self.state.lock().resources {
            resources.push(json!({"uri": uri, "name": name, "mimeType": "text/plain"}));
        }
        self
    }

    pub fn with_prompt(self, name: &str) -> Self {
        if let Some(ref mut prompts) = self.state.lock().prompts {
            prompts.push(json!({
                "name": name,
                "description": format!("The {} prompt", name),
                "arguments": [{"name": "name", "required": true}]
            }));
        }
        self
    }

    pub fn without_resources(self) -> Self {
        self.state.lock().resources = None;
        self
    }

    pub fn without_prompts(self) -> Self {
        self.state.lock().prompts = None;
        self
    }

    /// Advertise only the tools capability during the handshake.
    pub fn advertise_only_tools(self) -> Self {
        self.state.lock().tools_only = true;
        self
    }

    /// Answer `method` with an internal error.
    pub fn failing(self, method: &str) -> Self {
        self.state.lock().failing.insert(method.to_string());
        self
    }

    /// Hold tool call replies until `count` calls arrived, then answer them newest first.
    pub fn hold_calls(self, count: usize) -> Self {
        self.state.lock().hold_calls = count;
        self
    }

    /// Leave the next `count` requests for `method` unanswered.
    pub fn stall(&self, method: &str, count: usize) {
        self.state.lock().stalled.insert(method.to_string(), count);
    }

    pub fn with_page_size(self, size: usize) -> Self {
        self.state.lock().page_size = Some(size);
        self
    }

    pub fn add_tool(&self, name: &str, description: &str) {
        self.state.lock().tools.push(json!({
            "name": name,
            "description": description,
            "inputSchema": {"type": "object", "properties": {}}
        }));
    }

    /// Open a new session and return the client end of it.
    pub fn transport(&self) -> Arc<ChannelTransport> {
        let (to_server, mut requests) = mpsc::unbounded_channel::<String>();
        let (to_client, inbound) = mpsc::unbounded_channel::<Inbound>();
        self.state.lock().outbound = Some(to_client.clone());

        let state = Arc::clone(&self.state);
        let replies = to_client.clone();
        tokio::spawn(async move {
            while let Some(line) = requests.recv().await {
                let Ok(message) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let batch = {
                    let mut state = state.lock();
                    state.received.push(message.clone());
                    state.replies_for(&message)
                };
                for reply in batch {
                    if replies.send(Ok(reply.to_string())).is_err() {
                        return;
                    }
                }
            }
        });

        Arc::new(ChannelTransport::new(to_server, to_client, inbound))
    }

    /// Every message the server received, in order.
    pub fn received(&self) -> Vec<Value> {
        self.state.lock().received.clone()
    }

    /// Methods of the received requests and notifications, in order.
    pub fn received_methods(&self) -> Vec<String> {
        self.state
            .lock()
            .received
            .iter()
            .filter_map(|m| m.get("method").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// The most recent request for `method`.
    pub fn last_request(&self, method: &str) -> Option<Value> {
        self.state
            .lock()
            .received
            .iter()
            .rev()
            .find(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .cloned()
    }

    /// Send an arbitrary message to the current session.
    pub fn inject(&self, message: Value) {
        self.inject_raw(&message.to_string());
    }

    pub fn inject_raw(&self, frame: &str) {
        if let Some(ref outbound) = self.state.lock().outbound {
            let _ = outbound.send(Ok(frame.to_string()));
        }
    }

    /// Send a parameterless notification to the current session.
    pub fn notify(&self, method: &str) {
        self.inject(json!({"jsonrpc": "2.0", "method": method}));
    }
}
