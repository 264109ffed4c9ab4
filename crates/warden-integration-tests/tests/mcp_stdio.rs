//! End-to-end MCP over a real subprocess: a scripted shell server
//! answers the initialize handshake, tool discovery, and a tool call
//! over newline-delimited JSON-RPC on stdio.

#![cfg(unix)]

use std::sync::Arc;

use serde_json::json;
use warden_audit::AuditSink;
use warden_core::AgentId;
use warden_mcp::{McpManager, ServerConfig};
use warden_policy::{PolicyEngine, PolicyFile, PolicySnapshot};

/// A stdio MCP server in shell: responses keyed purely off request
/// order, which the client makes deterministic (initialize is id 1,
/// `notifications/initialized` carries no id, tools/list is id 2,
/// tools/call is id 3).
const SERVER_SCRIPT: &str = r#"
read line
printf '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"scripted","version":"0.0.1"}}}\n'
read line
read line
printf '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo text back","inputSchema":{"type":"object"}},{"name":"drop_tables","description":"Forbidden","inputSchema":{"type":"object"}}]}}\n'
read line
printf '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"echoed"}]}}\n'
cat > /dev/null
"#;

fn scripted_server(dir: &tempfile::TempDir) -> ServerConfig {
    let script = dir.path().join("server.sh");
    std::fs::write(&script, SERVER_SCRIPT).unwrap();
    ServerConfig::stdio("scripted", "/bin/sh").with_args([script.display().to_string()])
}

fn policy(dir: &tempfile::TempDir, yaml: &str) -> Arc<PolicyEngine> {
    warden_integration_tests::init_tracing();
    let file: PolicyFile = serde_yaml::from_str(yaml).unwrap();
    let snapshot = PolicySnapshot::from_file(&file).unwrap();
    let audit = Arc::new(AuditSink::open(dir.path().join("audit.jsonl")).unwrap());
    Arc::new(PolicyEngine::with_snapshot(
        snapshot,
        dir.path().join("policy.yaml"),
        audit,
    ))
}

#[tokio::test(flavor = "multi_thread")]
async fn handshake_discovery_and_invocation_over_stdio() {
    let dir = tempfile::tempdir().unwrap();
    let policy = policy(
        &dir,
        r#"
mcp:
  default: deny
  rules:
    - { agent: coder, server: scripted, tools: [echo] }
"#,
    );
    let manager = McpManager::new(policy);
    let agent = AgentId::from("coder");

    // Spawns the subprocess and completes the initialize handshake.
    manager
        .connect_agent_servers(&agent, vec![scripted_server(&dir)])
        .await
        .unwrap();
    assert!(manager.healthy(&agent, "scripted").await);

    // Discovery policy-filters the server's two tools down to one.
    let tools = manager.discover_tools(&agent).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].server_name, "scripted");

    // The surviving tool is callable end to end.
    let result = manager
        .invoke_tool(&agent, "scripted", "echo", json!({"text": "hi"}))
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "echoed");

    manager.disconnect_agent(&agent).await;
    assert!(!manager.healthy(&agent, "scripted").await);
}

#[tokio::test(flavor = "multi_thread")]
async fn filtered_tool_is_denied_at_invocation_too() {
    let dir = tempfile::tempdir().unwrap();
    let policy = policy(
        &dir,
        r#"
mcp:
  default: deny
  rules:
    - { agent: coder, server: scripted, tools: [echo] }
"#,
    );
    let manager = McpManager::new(policy);
    let agent = AgentId::from("coder");

    manager
        .connect_agent_servers(&agent, vec![scripted_server(&dir)])
        .await
        .unwrap();

    let err = manager
        .invoke_tool(&agent, "scripted", "drop_tables", json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("policy denied"));
}
