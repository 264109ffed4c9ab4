//! MCP client: request/response correlation and the initialize handshake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{McpError, McpResult};
use crate::protocol::{
    DiscoveredTool, JsonRpcMessage, JsonRpcResponse, PROTOCOL_VERSION,
};
use crate::transport::Transport;

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// A JSON-RPC 2.0 client over a [`Transport`].
///
/// A single background listener consumes frames from the transport and
/// routes responses to their originating request by id; notification
/// frames and unmatched ids are dropped with a trace log. The listener
/// lives until [`close`](Self::close) or transport failure.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    next_id: AtomicI64,
    cancel: CancellationToken,
    server_name: String,
}

impl McpClient {
    /// Create a client over `transport` and start its listener.
    #[must_use]
    pub fn new(server_name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let server_name = server_name.into();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        tokio::spawn(listener(
            server_name.clone(),
            Arc::clone(&transport),
            Arc::clone(&pending),
            cancel.clone(),
        ));

        Self {
            transport,
            pending,
            next_id: AtomicI64::new(1),
            cancel,
            server_name,
        }
    }

    /// The server this client talks to.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Send one request and await its response.
    ///
    /// # Errors
    ///
    /// Returns transport errors, [`McpError::Rpc`] for error responses,
    /// and [`McpError::Closed`] if the listener goes away first.
    pub async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = JsonRpcMessage::request(id, method, params);
        if let Err(e) = self.transport.send(&message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match rx.await {
            Ok(response) => response,
            Err(_) => return Err(McpError::Closed),
        };

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns transport errors.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.transport
            .send(&JsonRpcMessage::notification(method, params))
            .await
    }

    /// Perform the MCP handshake.
    ///
    /// Sends `initialize` with protocol version [`PROTOCOL_VERSION`]
    /// and the client's capabilities, then the
    /// `notifications/initialized` notification once the response
    /// arrives. Initialization is complete when the notification has
    /// been sent.
    ///
    /// # Errors
    ///
    /// Returns transport or RPC errors from either step.
    pub async fn initialize(&self) -> McpResult<Value> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": true }
            },
            "clientInfo": {
                "name": "warden",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let result = self.request("initialize", Some(params)).await?;
        self.notify("notifications/initialized", None).await?;
        debug!(server = %self.server_name, "MCP handshake complete");
        Ok(result)
    }

    /// List the server's tools.
    ///
    /// # Errors
    ///
    /// Returns transport, RPC, or shape errors.
    pub async fn list_tools(&self) -> McpResult<Vec<DiscoveredTool>> {
        let result = self.request("tools/list", None).await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| McpError::Protocol("tools/list result missing 'tools'".to_string()))?;
        let mut tools: Vec<DiscoveredTool> = serde_json::from_value(tools)
            .map_err(|e| McpError::Protocol(format!("bad tools/list shape: {e}")))?;
        for tool in &mut tools {
            tool.server_name.clone_from(&self.server_name);
        }
        Ok(tools)
    }

    /// Invoke a tool with JSON arguments.
    ///
    /// # Errors
    ///
    /// Returns transport or RPC errors.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<Value> {
        self.request(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    /// Stop the listener and close the transport. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.transport.close().await;
        // Release any callers still parked on a response.
        self.pending.lock().await.clear();
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Background frame router: consumes the transport until close/failure.
async fn listener(
    server: String,
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    cancel: CancellationToken,
) {
    loop {
        match transport.receive(&cancel).await {
            Ok(JsonRpcMessage::Response(response)) => {
                let sender = pending.lock().await.remove(&response.id);
                match sender {
                    Some(sender) => {
                        let _ = sender.send(response);
                    },
                    None => {
                        trace!(server = %server, id = response.id, "Dropping unmatched response");
                    },
                }
            },
            Ok(JsonRpcMessage::Notification(notification)) => {
                trace!(server = %server, method = %notification.method, "Dropping notification");
            },
            Ok(JsonRpcMessage::Request(request)) => {
                trace!(server = %server, method = %request.method, "Dropping server request");
            },
            Err(McpError::Canceled) => {
                debug!(server = %server, "Listener canceled");
                break;
            },
            Err(e) => {
                warn!(server = %server, error = %e, "Listener stopped on transport error");
                break;
            },
        }
    }
    // Wake all parked callers; their requests can never complete.
    pending.lock().await.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::MockServer;

    #[tokio::test]
    async fn test_request_response_correlation() {
        let (server, transport) = MockServer::start();
        let client = McpClient::new("mock", transport);

        // Answer in reverse order: responses route by id, not arrival order.
        server.respond_reversed(2, |request| {
            json!({"echoed_method": request.method, "echoed_id": request.id})
        });

        let first = client.request("alpha", None);
        let second = client.request("beta", None);
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap()["echoed_method"], "alpha");
        assert_eq!(second.unwrap()["echoed_method"], "beta");
        client.close().await;
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces() {
        let (server, transport) = MockServer::start();
        let client = McpClient::new("mock", transport);
        server.fail_with(-32601, "method not found");

        let err = client.request("nope", None).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32601, .. }));
        client.close().await;
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let (server, transport) = MockServer::start();
        let client = McpClient::new("mock", transport);
        server.respond_with(|_| json!({"serverInfo": {"name": "mock"}}));

        client.initialize().await.unwrap();

        let frames = server.sent_frames();
        match &frames[0] {
            JsonRpcMessage::Request(request) => {
                assert_eq!(request.method, "initialize");
                let params = request.params.as_ref().unwrap();
                assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
                assert_eq!(params["capabilities"]["roots"]["listChanged"], true);
                assert_eq!(params["clientInfo"]["name"], "warden");
            },
            other => panic!("expected initialize request, got {other:?}"),
        }
        match &frames[1] {
            JsonRpcMessage::Notification(notification) => {
                assert_eq!(notification.method, "notifications/initialized");
            },
            other => panic!("expected initialized notification, got {other:?}"),
        }
        client.close().await;
    }

    #[tokio::test]
    async fn test_list_tools_fills_server_name() {
        let (server, transport) = MockServer::start();
        let client = McpClient::new("github", transport);
        server.respond_with(|_| {
            json!({"tools": [
                {"name": "create_issue", "description": "Create an issue",
                 "inputSchema": {"type": "object"}}
            ]})
        });

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "create_issue");
        assert_eq!(tools[0].server_name, "github");
        client.close().await;
    }

    #[tokio::test]
    async fn test_call_tool_params_shape() {
        let (server, transport) = MockServer::start();
        let client = McpClient::new("mock", transport);
        server.respond_with(|_| json!({"content": []}));

        client
            .call_tool("create_issue", json!({"title": "bug"}))
            .await
            .unwrap();

        let frames = server.sent_frames();
        match &frames[0] {
            JsonRpcMessage::Request(request) => {
                assert_eq!(request.method, "tools/call");
                let params = request.params.as_ref().unwrap();
                assert_eq!(params["name"], "create_issue");
                assert_eq!(params["arguments"]["title"], "bug");
            },
            other => panic!("expected tools/call, got {other:?}"),
        }
        client.close().await;
    }

    #[tokio::test]
    async fn test_close_releases_pending_callers() {
        let (server, transport) = MockServer::start();
        let client = Arc::new(McpClient::new("mock", transport));
        server.hold_responses();

        let waiting = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request("slow", None).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        client.close().await;

        let result = waiting.await.unwrap();
        assert!(matches!(result.unwrap_err(), McpError::Closed));
    }
}
