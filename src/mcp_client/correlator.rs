//! Invocation correlator — tool calls in, exactly one outcome out.
//!
//! Every call resolves to an [`InvocationOutcome`]. Per-call problems
//! (bad arguments, provider-side errors, timeouts, a dropped connection) are
//! turned into `Failure` values here and never escalate to a session error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};

use super::errors::McpError;
use super::registry::{ArgumentCheck, ToolRegistry};
use super::transport::{extract_result, Connection, SESSION_CLOSED};
use super::types::{CallToolParams, CallToolResult, ContentBlock, InvocationId};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on calls in flight at once.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 4;

/// Failure message for calls abandoned after the timeout.
pub const FAILURE_TIMEOUT: &str = "timeout";

/// Failure message for calls rejected before dispatch.
pub const FAILURE_INVALID_ARGUMENTS: &str = "invalid arguments";

// ─── Types ───────────────────────────────────────────────────────────────────

/// One tool call to make.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub invocation_id: InvocationId,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
}

impl InvocationRequest {
    /// Build a request with a fresh invocation id.
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            invocation_id: InvocationId::next(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// How a single call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Success { content: Vec<ContentBlock> },
    Failure { message: String },
}

impl InvocationOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        InvocationOutcome::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Success { .. })
    }

    /// Text of all content blocks, one per line. Empty for failures.
    pub fn rendered_text(&self) -> String {
        match self {
            InvocationOutcome::Success { content } => content
                .iter()
                .map(ContentBlock::render)
                .collect::<Vec<_>>()
                .join("\n"),
            InvocationOutcome::Failure { .. } => String::new(),
        }
    }
}

/// A request paired with its outcome.
#[derive(Debug, Clone)]
pub struct CompletedInvocation {
    pub request: InvocationRequest,
    pub outcome: InvocationOutcome,
    pub elapsed_ms: u64,
}

// ─── InvocationCorrelator ────────────────────────────────────────────────────

/// Dispatches tool calls over a connection and pairs each with its outcome.
pub struct InvocationCorrelator {
    connection: Arc<Connection>,
    registry: ToolRegistry,
    call_timeout: Duration,
    max_concurrent: usize,
}

impl InvocationCorrelator {
    /// `registry` is a snapshot of the catalog used for pre-dispatch checks.
    pub fn new(connection: Arc<Connection>, registry: ToolRegistry) -> Self {
        Self {
            connection,
            registry,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT_CALLS,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Send one call and wait for its outcome.
    pub async fn invoke(&self, request: &InvocationRequest) -> InvocationOutcome {
        let tool = request.tool_name.as_str();
        let id = request.invocation_id;

        if let Err(rejection) = self.check(request) {
            tracing::warn!(tool, invocation_id = %id, error = %rejection, "call rejected before dispatch");
            return outcome_from_error(rejection);
        }

        let params = match serde_json::to_value(CallToolParams {
            name: tool.to_string(),
            arguments: request.arguments.clone(),
        }) {
            Ok(params) => params,
            Err(e) => return InvocationOutcome::failure(format!("failed to encode arguments: {e}")),
        };

        tracing::info!(tool, invocation_id = %id, "invoking tool");

        let response = self
            .connection
            .request(id, "tools/call", Some(params), self.call_timeout)
            .await;

        let outcome = match response.and_then(extract_result) {
            Ok(result) => outcome_from_result(result),
            Err(e) => outcome_from_error(e),
        };

        match &outcome {
            InvocationOutcome::Success { content } => {
                tracing::info!(tool, invocation_id = %id, blocks = content.len(), "tool succeeded");
            }
            InvocationOutcome::Failure { message } => {
                tracing::warn!(tool, invocation_id = %id, message = %message, "tool failed");
            }
        }
        outcome
    }

    /// Pre-dispatch check against the catalog snapshot.
    pub fn check(&self, request: &InvocationRequest) -> Result<(), McpError> {
        let tool = request.tool_name.as_str();
        match self.registry.validate_arguments(tool, &request.arguments) {
            ArgumentCheck::Valid => Ok(()),
            ArgumentCheck::UnknownTool => Err(McpError::UnknownTool {
                name: tool.to_string(),
            }),
            ArgumentCheck::Invalid { reason } => Err(McpError::InvalidArguments {
                tool: tool.to_string(),
                reason,
            }),
        }
    }

    /// Issue all calls concurrently (bounded by `max_concurrent`) and return
    /// them in the order they completed.
    pub async fn invoke_all(&self, requests: Vec<InvocationRequest>) -> Vec<CompletedInvocation> {
        stream::iter(requests)
            .map(|request| async move {
                let start = Instant::now();
                let outcome = self.invoke(&request).await;
                CompletedInvocation {
                    request,
                    outcome,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }
}

fn outcome_from_result(result: Value) -> InvocationOutcome {
    let parsed: CallToolResult = match serde_json::from_value(result) {
        Ok(parsed) => parsed,
        Err(e) => return InvocationOutcome::failure(format!("malformed tool result: {e}")),
    };

    if parsed.is_error {
        let text = parsed
            .content
            .iter()
            .map(ContentBlock::render)
            .collect::<Vec<_>>()
            .join("\n");
        let message = if text.trim().is_empty() {
            "tool reported an error".to_string()
        } else {
            text
        };
        return InvocationOutcome::Failure { message };
    }

    InvocationOutcome::Success {
        content: parsed.content,
    }
}

fn outcome_from_error(error: McpError) -> InvocationOutcome {
    match error {
        McpError::Timeout { .. } => InvocationOutcome::failure(FAILURE_TIMEOUT),
        McpError::UnknownTool { name } => InvocationOutcome::failure(format!("unknown tool: {name}")),
        McpError::InvalidArguments { .. } => InvocationOutcome::failure(FAILURE_INVALID_ARGUMENTS),
        McpError::ConnectionLost { .. } => InvocationOutcome::failure(SESSION_CLOSED),
        McpError::ServerError { code, message, .. } => {
            InvocationOutcome::failure(format!("[{code}] {message}"))
        }
        other => InvocationOutcome::failure(other.to_string()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
