//! Standard I/O transport.
//!
//! Spawns the server as a child process and exchanges newline-delimited
//! JSON over its stdin and stdout. Stderr is drained on its own task so a
//! chatty server can never block the protocol channel.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{MessageStream, Transport, DEFAULT_SHUTDOWN_GRACE};
use crate::types::ServerConfig;

/// Handles produced by `start()` and consumed by `receive()`/`close()`.
#[derive(Default)]
struct StdioState {
    started: bool,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
}

/// Standard I/O transport for MCP servers.
pub struct StdioTransport {
    server_name: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    grace_period: Duration,
    child: tokio::sync::Mutex<Option<Child>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    state: Mutex<StdioState>,
    connected: AtomicBool,
}

impl StdioTransport {
    /// Create an unstarted transport for `command args`.
    pub fn new(server_name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            server_name: server_name.into(),
            command: command.into(),
            args,
            env: BTreeMap::new(),
            working_dir: None,
            grace_period: DEFAULT_SHUTDOWN_GRACE,
            child: tokio::sync::Mutex::new(None),
            stdin: tokio::sync::Mutex::new(None),
            state: Mutex::new(StdioState::default()),
            connected: AtomicBool::new(false),
        }
    }

    /// Create a transport from a server config.
    pub fn from_config(server_name: &str, config: &ServerConfig) -> Result<Self, TransportError> {
        let command = config.command().ok_or_else(|| {
            TransportError::InvalidConfig(format!(
                "stdio server '{}' requires a 'command'",
                server_name
            ))
        })?;

        let mut transport = Self::new(server_name, command, config.args());
        transport.env = config.env.clone();
        transport.working_dir = config.working_dir();
        Ok(transport)
    }

    /// Set extra environment variables for the child.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set how long the child gets to exit after SIGTERM.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Get the process ID of the child process.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    fn spawn_stderr_drain(&self, stderr: ChildStderr) -> JoinHandle<()> {
        let server = self.server_name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            info!(target: "mcphub_mcp::stderr", server = %server, "{}", line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(server = %server, error = %e, "Failed to read server stderr");
                        break;
                    }
                }
            }
        })
    }

    async fn terminate(&self, child: &mut Child) {
        let Some(pid) = child.id() else {
            // Already reaped
            return;
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            debug!(server = %self.server_name, pid, "Sending SIGTERM to MCP server");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

            tokio::select! {
                _ = child.wait() => {
                    debug!(server = %self.server_name, "MCP server exited gracefully");
                    return;
                }
                _ = tokio::time::sleep(self.grace_period) => {
                    warn!(server = %self.server_name, "MCP server did not exit gracefully, killing");
                }
            }
        }

        if let Err(e) = child.kill().await {
            warn!(server = %self.server_name, pid, error = %e, "Failed to kill MCP server");
        }
    }
}

fn line_stream(lines: Lines<BufReader<ChildStdout>>, server: String) -> MessageStream {
    futures::stream::unfold(Some(lines), move |state| {
        let server = server.clone();
        async move {
            let mut lines = state?;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        debug!(server = %server, message = line, "Received message from MCP server");
                        return Some((Ok(line.to_string()), Some(lines)));
                    }
                    Ok(None) => return None,
                    Err(e) => return Some((Err(TransportError::ReadError(e)), None)),
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let mut child_slot = self.child.lock().await;
        if self.state.lock().started {
            return Err(TransportError::AlreadyStarted);
        }

        debug!(
            server = %self.server_name,
            command = %self.command,
            args = ?self.args,
            "Spawning MCP server process"
        );

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdout"))
        })?;
        let stderr_task = child.stderr.take().map(|stderr| self.spawn_stderr_drain(stderr));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            state.started = true;
            state.stdout = Some(stdout);
            state.stderr_task = stderr_task;
            state.shutdown_tx = Some(shutdown_tx);
            state.shutdown_rx = Some(shutdown_rx);
        }

        info!(server = %self.server_name, pid = ?child.id(), "MCP server process spawned");

        *self.stdin.lock().await = Some(stdin);
        *child_slot = Some(child);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::NotConnected)?;

        debug!(server = %self.server_name, message = message, "Sending message to MCP server");

        stdin
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;
        stdin.write_all(b"\n").await.map_err(TransportError::WriteError)?;
        stdin.flush().await.map_err(TransportError::WriteError)?;

        Ok(())
    }

    fn receive(&self) -> Result<MessageStream, TransportError> {
        let (stdout, shutdown_rx) = {
            let mut state = self.state.lock();
            if !state.started {
                return Err(TransportError::NotConnected);
            }
            match (state.stdout.take(), state.shutdown_rx.take()) {
                (Some(stdout), Some(rx)) => (stdout, rx),
                _ => {
                    return Err(TransportError::InvalidConfig(
                        "inbound stream already taken".to_string(),
                    ))
                }
            }
        };

        let lines = BufReader::new(stdout).lines();
        Ok(line_stream(lines, self.server_name.clone())
            .take_until(shutdown_rx)
            .boxed())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        let (shutdown_tx, stderr_task) = {
            let mut state = self.state.lock();
            (state.shutdown_tx.take(), state.stderr_task.take())
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }

        // Closing stdin is the polite way to ask a server to exit.
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            debug!(server = %self.server_name, "Closing MCP server transport");
            self.terminate(&mut child).await;
        }

        if let Some(task) = stderr_task {
            task.abort();
        }

        if was_connected {
            info!(server = %self.server_name, "MCP server transport closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
