//! Event-stream transport.
//!
//! Inbound messages arrive as `data` fields of a long-lived
//! `text/event-stream` response. Each outbound message is an independent
//! HTTP POST to the send URL.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::sse::{SseEvent, SseParser};
use crate::transport::{MessageStream, Transport};
use crate::types::ServerConfig;

/// Path of the send URL relative to the subscribe URL when none is configured.
const DEFAULT_SEND_PATH: &str = "messages";

/// How long a send waits for the server to announce its endpoint.
pub const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct SseState {
    started: bool,
    response: Option<reqwest::Response>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
}

/// Server-sent events transport for MCP servers.
pub struct SseTransport {
    server_name: String,
    url: Url,
    send_url: Arc<RwLock<Url>>,
    /// `true` once the send URL is final: configured, announced or given up on.
    endpoint: Arc<watch::Sender<bool>>,
    endpoint_timeout: Duration,
    client: reqwest::Client,
    state: Mutex<SseState>,
    connected: AtomicBool,
}

impl SseTransport {
    /// Create a transport from a server config.
    pub fn from_config(server_name: &str, config: &ServerConfig) -> Result<Self, TransportError> {
        let raw = config.url().ok_or_else(|| {
            TransportError::InvalidConfig(format!("sse server '{}' requires a 'url'", server_name))
        })?;
        let url = Url::parse(raw)
            .map_err(|e| TransportError::InvalidConfig(format!("invalid url '{}': {}", raw, e)))?;

        let configured = config.send_url();
        let send_path = configured.unwrap_or(DEFAULT_SEND_PATH);
        let send_url = url.join(send_path).map_err(|e| {
            TransportError::InvalidConfig(format!("invalid send url '{}': {}", send_path, e))
        })?;

        let mut headers = HeaderMap::new();
        for (key, value) in config.headers() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TransportError::InvalidConfig(format!("header '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TransportError::InvalidConfig(format!("header '{}': {}", key, e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            server_name: server_name.to_string(),
            url,
            send_url: Arc::new(RwLock::new(send_url)),
            endpoint: Arc::new(watch::channel(configured.is_some()).0),
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
            client,
            state: Mutex::new(SseState::default()),
            connected: AtomicBool::new(false),
        })
    }

    /// URL outbound messages are currently posted to.
    pub fn send_url(&self) -> Url {
        self.send_url.read().clone()
    }

    /// Set how long sends wait for the endpoint event.
    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    /// Wait until the server has announced where to post.
    ///
    /// Servers that never announce an endpoint get the default send URL
    /// once the timeout passes. The announcement only arrives while the
    /// inbound stream is being polled.
    async fn wait_for_endpoint(&self) {
        let mut known = self.endpoint.subscribe();
        if *known.borrow() {
            return;
        }

        let announced = tokio::time::timeout(self.endpoint_timeout, known.wait_for(|k| *k))
            .await
            .is_ok();
        if !announced {
            warn!(
                server = %self.server_name,
                url = %self.send_url(),
                "No endpoint event received, posting to the default send URL"
            );
            self.endpoint.send_replace(true);
        }
    }
}

/// Turns response bytes into protocol messages.
struct EventReader<S> {
    server_name: String,
    bytes: S,
    parser: SseParser,
    queue: VecDeque<String>,
    base: Url,
    send_url: Arc<RwLock<Url>>,
    endpoint: Arc<watch::Sender<bool>>,
    done: bool,
}

impl<S, B> EventReader<S>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            if let Some(data) = self.queue.pop_front() {
                return Some(Ok(data));
            }
            if self.done {
                return None;
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => {
                    for event in self.parser.feed(chunk.as_ref()) {
                        self.handle_event(event);
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(TransportError::Http(e.to_string())));
                }
                None => self.done = true,
            }
        }
    }

    fn handle_event(&mut self, event: SseEvent) {
        if event.is_endpoint() {
            match self.base.join(event.data.trim()) {
                Ok(url) => {
                    debug!(server = %self.server_name, url = %url, "Server announced message endpoint");
                    *self.send_url.write() = url;
                    self.endpoint.send_replace(true);
                }
                Err(e) => {
                    warn!(server = %self.server_name, error = %e, "Ignoring invalid endpoint event");
                }
            }
            return;
        }

        if event.is_message() {
            debug!(server = %self.server_name, message = %event.data, "Received message from MCP server");
            self.queue.push_back(event.data);
        } else {
            debug!(server = %self.server_name, event = ?event.event, "Ignoring event");
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.state.lock().started {
            return Err(TransportError::AlreadyStarted);
        }

        debug!(server = %self.server_name, url = %self.url, "Opening event stream");

        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.started {
                return Err(TransportError::AlreadyStarted);
            }
            state.started = true;
            state.response = Some(response);
            state.shutdown_tx = Some(shutdown_tx);
            state.shutdown_rx = Some(shutdown_rx);
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(server = %self.server_name, url = %self.url, "Event stream opened");
        Ok(())
    }

    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.wait_for_endpoint().await;
        let url = self.send_url();
        debug!(server = %self.server_name, url = %url, message = message, "Posting message to MCP server");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    fn receive(&self) -> Result<MessageStream, TransportError> {
        let (response, shutdown_rx) = {
            let mut state = self.state.lock();
            if !state.started {
                return Err(TransportError::NotConnected);
            }
            match (state.response.take(), state.shutdown_rx.take()) {
                (Some(response), Some(rx)) => (response, rx),
                _ => {
                    return Err(TransportError::InvalidConfig(
                        "inbound stream already taken".to_string(),
                    ))
                }
            }
        };

        let reader = EventReader {
            server_name: self.server_name.clone(),
            bytes: response.bytes_stream().boxed(),
            parser: SseParser::new(),
            queue: VecDeque::new(),
            base: self.url.clone(),
            send_url: Arc::clone(&self.send_url),
            endpoint: Arc::clone(&self.endpoint),
            done: false,
        };

        let messages = futures::stream::unfold(reader, |mut reader| async move {
            let item = reader.next_message().await?;
            Some((item, reader))
        });

        Ok(messages.take_until(shutdown_rx).boxed())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        let (shutdown_tx, response) = {
            let mut state = self.state.lock();
            (state.shutdown_tx.take(), state.response.take())
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        drop(response);

        if was_connected {
            info!(server = %self.server_name, "Event stream closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    #[test]
    fn test_default_send_url_is_sibling() {
        let transport =
            SseTransport::from_config("remote", &ServerConfig::sse("http://localhost:8000/mcp/events"))
                .unwrap();
        assert_eq!(transport.send_url().as_str(), "http://localhost:8000/mcp/messages");
    }

    #[test]
    fn test_configured_send_url() {
        let config = ServerConfig::sse("http://localhost:8000/mcp/events").with_send_url("/rpc");
        let transport = SseTransport::from_config("remote", &config).unwrap();
        assert_eq!(transport.send_url().as_str(), "http://localhost:8000/rpc");

        let config = ServerConfig::sse("http://localhost:8000/events")
            .with_send_url("https://other.example/post");
        let transport = SseTransport::from_config("remote", &config).unwrap();
        assert_eq!(transport.send_url().as_str(), "https://other.example/post");
    }

    #[test]
    fn test_invalid_config() {
        let result = SseTransport::from_config("remote", &ServerConfig::sse("not a url"));
        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));

        let config = ServerConfig::sse("http://localhost/events").with_header("bad header", "x");
        let result = SseTransport::from_config("remote", &config);
        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));
    }

    /// Reads one HTTP request head, returns (method, path, body).
    async fn read_request(stream: &mut TcpStream) -> (String, String, String) {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            if stream.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            buf.push(byte[0]);
        }
        let head = String::from_utf8_lossy(&buf).to_string();
        let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let path = parts.next().unwrap_or_default().to_string();

        let length = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())?
            })
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).await.unwrap();
        (method, path, String::from_utf8(body).unwrap())
    }

    fn echo(body: &str) -> Option<String> {
        Some(body.to_string())
    }

    /// Answers the handshake and discovery requests of an MCP client.
    fn respond(body: &str) -> Option<String> {
        let request: serde_json::Value = serde_json::from_str(body).ok()?;
        let id = request.get("id")?.clone();
        let result = match request["method"].as_str()? {
            "initialize" => serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "remote-server", "version": "1.0.0"}
            }),
            "tools/list" => serde_json::json!({
                "tools": [{"name": "say", "inputSchema": {"type": "object"}}]
            }),
            _ => serde_json::json!({}),
        };
        Some(serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
    }

    /// Minimal event-stream server.
    ///
    /// The endpoint event `/rpc?session=1` goes out after `endpoint_delay`,
    /// or never when it is `None`. Posts to any other path are rejected the
    /// way session-based servers do. Every accepted post is passed through
    /// `reply` and the output, if any, is pushed back as an event.
    async fn spawn_server(endpoint_delay: Option<Duration>, reply: fn(&str) -> Option<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (echo_tx, echo_rx) = mpsc::unbounded_channel::<String>();
        let echo_rx = Arc::new(tokio::sync::Mutex::new(echo_rx));

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let echo_tx = echo_tx.clone();
                let echo_rx = Arc::clone(&echo_rx);
                tokio::spawn(async move {
                    let (method, path, body) = read_request(&mut stream).await;
                    match (method.as_str(), path.as_str()) {
                        ("GET", "/events") => {
                            stream
                                .write_all(
                                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\
                                      Cache-Control: no-cache\r\n\r\n",
                                )
                                .await
                                .unwrap();
                            stream.flush().await.unwrap();
                            if let Some(delay) = endpoint_delay {
                                tokio::time::sleep(delay).await;
                                stream
                                    .write_all(b"event: endpoint\ndata: /rpc?session=1\n\n")
                                    .await
                                    .unwrap();
                            }
                            stream.write_all(b"data: {\"ready\":true}\n\n").await.unwrap();

                            let mut echo_rx = echo_rx.lock().await;
                            while let Some(message) = echo_rx.recv().await {
                                let frame = format!("data: {}\n\n", message);
                                if stream.write_all(frame.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                        }
                        ("POST", "/rpc?session=1") => {
                            if let Some(message) = reply(&body) {
                                echo_tx.send(message).unwrap();
                            }
                            stream
                                .write_all(b"HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                                .await
                                .unwrap();
                        }
                        ("POST", _) => {
                            stream
                                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 10\r\nConnection: close\r\n\r\nno session")
                                .await
                                .unwrap();
                        }
                        _ => {
                            stream
                                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\nConnection: close\r\n\r\nmissing")
                                .await
                                .unwrap();
                        }
                    }
                });
            }
        });

        format!("http://{}", addr)
    }

    async fn spawn_echo_server() -> String {
        spawn_server(Some(Duration::ZERO), echo).await
    }

    /// Forward the inbound stream to a channel, the way the client's reader task does.
    fn drain(mut inbound: MessageStream) -> (mpsc::UnboundedReceiver<String>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(Ok(message)) = inbound.next().await {
                if tx.send(message).is_err() {
                    break;
                }
            }
        });
        (rx, handle)
    }

    #[tokio::test]
    async fn test_round_trip_through_endpoint() {
        let base = spawn_echo_server().await;
        let transport =
            SseTransport::from_config("remote", &ServerConfig::sse(format!("{}/events", base)))
                .unwrap();

        transport.start().await.unwrap();
        assert!(transport.is_connected());
        let mut inbound = transport.receive().unwrap();

        // The endpoint event precedes this frame on the wire
        assert_eq!(inbound.next().await.unwrap().unwrap(), r#"{"ready":true}"#);
        assert_eq!(transport.send_url().as_str(), format!("{}/rpc?session=1", base));

        transport.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).await.unwrap();
        assert_eq!(
            inbound.next().await.unwrap().unwrap(),
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#
        );

        transport.close().await.unwrap();
        assert!(inbound.next().await.is_none());
        assert!(matches!(
            transport.send("{}").await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_error_status() {
        let base = spawn_echo_server().await;
        let transport =
            SseTransport::from_config("remote", &ServerConfig::sse(format!("{}/missing", base)))
                .unwrap();

        let err = transport.start().await.unwrap_err();
        assert!(matches!(err, TransportError::HttpStatus { status: 404, ref body } if body == "missing"));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_post_error_status() {
        let base = spawn_echo_server().await;
        let config = ServerConfig::sse(format!("{}/events", base)).with_send_url("/nowhere");
        let transport = SseTransport::from_config("remote", &config).unwrap();

        transport.start().await.unwrap();
        // The stream is never polled, so the endpoint event is not applied
        let err = transport.send("{}").await.unwrap_err();
        assert!(matches!(err, TransportError::HttpStatus { status: 400, ref body } if body == "no session"));
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_waits_for_delayed_endpoint() {
        let base = spawn_server(Some(Duration::from_millis(50)), echo).await;
        let transport =
            SseTransport::from_config("remote", &ServerConfig::sse(format!("{}/events", base)))
                .unwrap();

        transport.start().await.unwrap();
        let (mut inbound, reader) = drain(transport.receive().unwrap());

        // Issued before the endpoint event is on the wire
        transport.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).await.unwrap();
        assert_eq!(transport.send_url().as_str(), format!("{}/rpc?session=1", base));

        assert_eq!(inbound.recv().await.unwrap(), r#"{"ready":true}"#);
        assert_eq!(
            inbound.recv().await.unwrap(),
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#
        );

        transport.close().await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_endpoint_falls_back_to_default() {
        let base = spawn_server(None, echo).await;
        let transport =
            SseTransport::from_config("remote", &ServerConfig::sse(format!("{}/events", base)))
                .unwrap()
                .with_endpoint_timeout(Duration::from_millis(100));

        transport.start().await.unwrap();
        let (mut inbound, reader) = drain(transport.receive().unwrap());
        assert_eq!(inbound.recv().await.unwrap(), r#"{"ready":true}"#);

        let err = transport.send("{}").await.unwrap_err();
        assert!(matches!(err, TransportError::HttpStatus { status: 400, .. }));
        assert_eq!(transport.send_url().as_str(), format!("{}/messages", base));

        transport.close().await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_handshake_with_delayed_endpoint() {
        let base = spawn_server(Some(Duration::from_millis(50)), respond).await;
        let client = crate::client::McpClient::new("remote", ServerConfig::sse(format!("{}/events", base)));

        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.server_info().unwrap().name, "remote-server");
        assert!(client.has_tool("say"));

        client.disconnect().await.unwrap();
    }
}
