//! MCP client error types.

use thiserror::Error;

/// Errors that can occur while talking to a tool provider.
#[derive(Debug, Error)]
pub enum McpError {
    /// The provider process failed to start or exited before the handshake
    /// completed. `diagnostics` holds whatever the process wrote to stderr.
    #[error("failed to spawn provider '{name}': {reason}{}", format_diagnostics(.diagnostics))]
    SpawnFailed {
        name: String,
        reason: String,
        diagnostics: String,
    },

    /// The `tools/list` exchange failed or returned a malformed catalog.
    #[error("tool discovery failed for '{name}': {reason}")]
    DiscoveryFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for provider '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// The provider exited or its stdout closed while requests were possible.
    #[error("connection to provider '{server}' lost: {reason}")]
    ConnectionLost {
        server: String,
        reason: String,
    },

    /// Provider returned a JSON-RPC error response.
    #[error("provider error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Tool not present in the discovered catalog. Raised before dispatch.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// A request did not receive its response in time.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        timeout_ms: u64,
    },

    /// A second request was issued for an invocation id that is still waiting.
    #[error("invocation {id} is already in flight")]
    DuplicateInvocation {
        id: u64,
    },
}

impl McpError {
    /// Whether this error means the channel to the provider is gone for good.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, McpError::ConnectionLost { .. })
    }
}

fn format_diagnostics(diagnostics: &str) -> String {
    if diagnostics.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", diagnostics.trim())
    }
}
