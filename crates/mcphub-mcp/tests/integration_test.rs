//! Integration tests driving the mock MCP server binary over real stdio pipes.

use std::path::PathBuf;
use std::time::Duration;

use mcphub_mcp::{
    ConfigLoader, ConnectionStatus, McpClient, McpError, McpHost, ServerConfig,
};
use serde_json::json;
use tempfile::TempDir;

const MOCK_SERVER: &str = env!("CARGO_BIN_EXE_mock-mcp-server");

fn mock(name: &str) -> ServerConfig {
    ServerConfig::stdio(MOCK_SERVER).with_args(["--name", name])
}

/// Write a servers document and load it back through the loader.
fn write_servers(dir: &TempDir, servers: serde_json::Value) -> PathBuf {
    let path = dir.path().join("mcp_servers_config.json");
    std::fs::write(&path, json!({ "mcp_servers": servers }).to_string()).unwrap();
    path
}

async fn wait_for_status(host: &McpHost, server: &str, expected: ConnectionStatus) {
    for _ in 0..100 {
        if host.get_status().get(server).map(|s| s.status) == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never reached status {}", server, expected);
}

#[tokio::test]
async fn test_echo_through_loaded_config() {
    let dir = TempDir::new().unwrap();
    let path = write_servers(
        &dir,
        json!({
            "echo": {
                "transport_type": "stdio",
                "config": {"command": MOCK_SERVER, "args": ["--name", "echo"]}
            }
        }),
    );

    let configs = ConfigLoader::load(&path).unwrap();
    let host = McpHost::new(configs);
    host.initialize().await;

    let status = &host.get_status()["echo"];
    assert_eq!(status.status, ConnectionStatus::Connected);
    assert_eq!(status.tools_count, 3);

    let result = host
        .call_tool("echo__say", json!({"text": "hello"}))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.text(), "hello");

    let sum = host
        .call_tool("echo__add", json!({"a": 2, "b": 3}))
        .await
        .unwrap();
    assert_eq!(sum.text(), "5");

    host.shutdown().await;
    assert!(host.get_status().is_empty());
}

#[tokio::test]
async fn test_initialize_with_partial_failures() {
    let mut configs = std::collections::BTreeMap::new();
    configs.insert("a".to_string(), mock("a"));
    configs.insert("b".to_string(), mock("b"));
    configs.insert(
        "missing".to_string(),
        ServerConfig::stdio("/nonexistent/mcp-server-binary"),
    );

    let host = McpHost::new(configs);
    host.initialize().await;

    let status = host.get_status();
    assert_eq!(status.len(), 3);
    assert_eq!(host.connected_servers().len(), 2);
    assert_eq!(status["missing"].status, ConnectionStatus::Error);
    assert!(status["missing"].error_message.is_some());

    let err = host.call_tool("missing__say", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::ServerNotConnected(_)));

    host.shutdown().await;
}

#[tokio::test]
async fn test_name_collisions_route_to_each_server() {
    let mut configs = std::collections::BTreeMap::new();
    configs.insert("a".to_string(), mock("a"));
    configs.insert("b".to_string(), mock("b").with_args(["--name", "b", "--no-prompts"]));

    let host = McpHost::new(configs);
    host.initialize().await;

    let tools = host.get_all_tools();
    assert!(tools.contains_key("a__say"));
    assert!(tools.contains_key("b__say"));
    assert_eq!(host.tool_count(), 6);

    assert_eq!(host.prompt_count(), 1);
    let greeting = host
        .get_prompt("a__greet", Some(json!({"who": "Ada"}).as_object().unwrap().clone()))
        .await
        .unwrap();
    assert!(greeting.contains("Say hello to Ada"));

    // Resources are keyed by uri, one per server
    let resources = host.get_all_resources();
    assert_eq!(resources.len(), 2);
    let contents = host.read_resource("mock://b/notes").await.unwrap();
    assert_eq!(contents.text(), "notes of b");

    host.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let mut configs = std::collections::BTreeMap::new();
    configs.insert("echo".to_string(), mock("echo"));
    let host = McpHost::new(configs);
    host.initialize().await;

    let client = host.client("echo").unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);
    assert!(client.tools().is_empty());
    assert_eq!(host.tool_count(), 0);

    host.reconnect("echo").await.unwrap();
    let result = host
        .call_tool("echo__say", json!({"text": "again"}))
        .await
        .unwrap();
    assert_eq!(result.text(), "again");

    host.shutdown().await;
}

#[tokio::test]
async fn test_server_crash_marks_error() {
    let mut configs = std::collections::BTreeMap::new();
    configs.insert("fragile".to_string(), mock("fragile"));
    configs.insert("steady".to_string(), mock("steady"));
    let host = McpHost::new(configs);
    host.initialize().await;

    let result = host.call_tool("fragile__crash", json!({})).await.unwrap();
    assert!(result.is_error);

    wait_for_status(&host, "fragile", ConnectionStatus::Error).await;
    assert!(!host.get_all_tools().contains_key("fragile__say"));

    // The sibling is unaffected
    let result = host
        .call_tool("steady__say", json!({"text": "still here"}))
        .await
        .unwrap();
    assert_eq!(result.text(), "still here");

    // A crashed server can be brought back
    host.reconnect("fragile").await.unwrap();
    assert!(host.client("fragile").unwrap().is_connected());

    host.shutdown().await;
}

#[tokio::test]
async fn test_client_over_stdio() {
    let client = McpClient::new("solo", mock("solo").with_args(["--name", "solo", "--no-resources"]));
    client.connect().await.unwrap();

    let info = client.server_info().unwrap();
    assert_eq!(info.name, "solo");
    assert_eq!(info.protocol_version, "2024-11-05");
    assert!(client.resources().is_empty());
    assert!(client.has_prompt("greet"));

    let err = client.call_tool("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::ToolNotFound(_)));

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
    assert!(matches!(
        client.call_tool("say", json!({"text": "x"})).await,
        Err(McpError::NotConnected)
    ));
}
