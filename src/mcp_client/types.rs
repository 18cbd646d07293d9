//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and MCP protocol structures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no `id`, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// `id` is optional so that server-initiated notifications on the same
/// stream parse cleanly and can be skipped by the reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ─── Correlation ─────────────────────────────────────────────────────────────

/// Process-wide monotonic request id counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque correlation token linking one request to its response.
///
/// Doubles as the JSON-RPC `id`. Ids come from a process-wide counter and
/// are never reused, so a late response can never match a newer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InvocationId(u64);

impl InvocationId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// A tool as advertised by the provider's `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema", rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    /// Names of the top-level parameters declared in the input schema.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.input_schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| props.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default()
    }
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// `tools/call` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
    /// Block types this client does not understand, kept verbatim.
    #[serde(untagged)]
    Other(serde_json::Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Plain-text rendering used when folding results into a prompt.
    pub fn render(&self) -> String {
        match self {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::Image { mime_type, data } => {
                format!("[image: {mime_type}, {} bytes base64]", data.len())
            }
            ContentBlock::Resource { resource } => {
                match resource.get("text").and_then(|t| t.as_str()) {
                    Some(text) => text.to_string(),
                    None => {
                        let uri = resource
                            .get("uri")
                            .and_then(|u| u.as_str())
                            .unwrap_or("unknown");
                        format!("[resource: {uri}]")
                    }
                }
            }
            ContentBlock::Other(raw) => {
                let kind = raw.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
                format!("[{kind} content]")
            }
        }
    }
}

/// `tools/call` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// How to launch a provider process.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ServerConfig {
    /// Build a launch config for a provider script, picking the interpreter
    /// from the file extension. Unknown extensions are executed directly.
    pub fn for_script(path: &str) -> Self {
        let ext = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let (command, mut args): (&str, Vec<String>) = match ext {
            "js" | "mjs" | "cjs" => ("node", vec![]),
            "py" => (default_python_command(), vec![]),
            "ts" => (default_npx_command(), vec!["tsx".to_string()]),
            _ => (path, vec![]),
        };
        if command != path {
            args.push(path.to_string());
        }

        Self {
            command: command.to_string(),
            args,
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Short display name used in logs and errors.
    pub fn display_name(&self) -> String {
        let target = self.args.last().unwrap_or(&self.command);
        std::path::Path::new(target)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(target)
            .to_string()
    }
}

/// Windows ships `npx` as a batch script.
fn default_npx_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "npx.cmd"
    } else {
        "npx"
    }
}

fn default_python_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_string(&note).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_response_without_id_parses() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.id.is_none());
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, Some(2));
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_invocation_ids_are_unique() {
        let a = InvocationId::next();
        let b = InvocationId::next();
        assert!(b > a);
    }

    #[test]
    fn test_tool_descriptor_from_wire() {
        let json = r#"{
            "name": "calculate",
            "description": "Perform a simple calculation",
            "inputSchema": {"type":"object","properties":{"expression":{"type":"string"}},"required":["expression"]}
        }"#;
        let tool: ToolDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(tool.parameter_names(), vec!["expression"]);
    }

    #[test]
    fn test_tool_descriptor_default_schema() {
        let tool: ToolDescriptor = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.parameter_names().is_empty());
    }

    #[test]
    fn test_call_tool_result_content_blocks() {
        let json = r#"{"content":[
            {"type":"text","text":"The result of 15 + 25 is 40"},
            {"type":"image","data":"AAAA","mimeType":"image/png"}
        ]}"#;
        let result: CallToolResult = serde_json::from_str(json).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content[0].render(), "The result of 15 + 25 is 40");
        assert_eq!(result.content[1].render(), "[image: image/png, 4 bytes base64]");
    }

    #[test]
    fn test_unknown_content_block_is_preserved() {
        let json = r#"{"content":[{"type":"audio","data":"xx"}],"isError":false}"#;
        let result: CallToolResult = serde_json::from_str(json).unwrap();
        assert!(matches!(result.content[0], ContentBlock::Other(_)));
        assert_eq!(result.content[0].render(), "[audio content]");
    }

    #[test]
    fn test_server_config_for_script() {
        let js = ServerConfig::for_script("example-server.js");
        assert_eq!(js.command, "node");
        assert_eq!(js.args, vec!["example-server.js"]);
        assert_eq!(js.display_name(), "example-server");

        let bin = ServerConfig::for_script("/usr/local/bin/provider");
        assert_eq!(bin.command, "/usr/local/bin/provider");
        assert!(bin.args.is_empty());
        assert_eq!(bin.display_name(), "provider");
    }
}
