//! JSON-RPC 2.0 wire types and MCP tool shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON-RPC version string on every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// The MCP protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// An outbound request (carries an id and expects a response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: i64,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// An inbound response, matched to a request by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id of the originating request.
    pub id: i64,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// The error object of a failed JSON-RPC call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A notification (no id, no response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Any frame that can cross the transport.
///
/// Untagged: a frame with an `id` and `method` is a request, with an
/// `id` alone a response, with `method` alone a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request frame.
    Request(JsonRpcRequest),
    /// Response frame.
    Response(JsonRpcResponse),
    /// Notification frame.
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Build a request frame.
    #[must_use]
    pub fn request(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        })
    }

    /// Build a notification frame.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        })
    }
}

/// A tool discovered from an MCP server's `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTool {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the tool's input.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
    /// The server the tool came from (filled by the discoverer).
    #[serde(default)]
    pub server_name: String,
}

impl DiscoveredTool {
    /// Description with the rendered input schema appended, so
    /// language-model callers see the expected argument shape.
    #[must_use]
    pub fn description_with_schema(&self) -> String {
        if self.input_schema.is_null() {
            return self.description.clone();
        }
        format!("{}\n\nInput schema: {}", self.description, self.input_schema)
    }
}
