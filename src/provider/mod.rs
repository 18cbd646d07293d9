//! Example tool provider — an MCP server over newline-delimited stdio.
//!
//! Serves `get-weather` and `calculate`. Shipped as the `example-provider`
//! binary and used by the integration tests as a real subprocess.
//!
//! Diagnostics go to stderr; stdout carries protocol frames only.

pub mod expr;
pub mod tools;

use std::time::Duration;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::mcp_client::types::{error_codes, PROTOCOL_VERSION};
use tools::CallRejection;

pub const SERVER_NAME: &str = "example-server";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("stdio error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Runtime knobs, mostly for exercising client failure handling.
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// Exit after answering this many requests.
    pub exit_after: Option<u64>,
    /// Exit without answering when a request for this method arrives.
    pub exit_on: Option<String>,
    /// Wait this long before answering each `tools/call`.
    pub call_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The client closed stdin.
    Eof,
    /// `exit_after` was reached.
    ExitAfter,
    /// A request for the `exit_on` method arrived.
    ExitOn,
}

impl StopReason {
    /// Whether the stop was injected rather than the client hanging up.
    pub fn is_injected(self) -> bool {
        !matches!(self, StopReason::Eof)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    pub requests_answered: u64,
    pub stopped_by: StopReason,
}

/// Answer requests from `reader` on `writer` until EOF or `exit_after`.
pub async fn serve<R, W>(
    reader: R,
    mut writer: W,
    options: &ProviderOptions,
) -> Result<ServeSummary, ProviderError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut answered = 0u64;

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable frame");
                let reply = error_response(Value::Null, error_codes::PARSE_ERROR, format!("parse error: {e}"));
                write_frame(&mut writer, &reply).await?;
                continue;
            }
        };

        let method = message.get("method").and_then(Value::as_str);
        let is_request = message.get("id").is_some_and(|id| !id.is_null());
        if is_request && method.is_some() && method == options.exit_on.as_deref() {
            tracing::info!(method, answered, "exit-on method received, stopping without a reply");
            return Ok(ServeSummary {
                requests_answered: answered,
                stopped_by: StopReason::ExitOn,
            });
        }

        let Some(reply) = handle_message(&message, options).await else {
            continue;
        };
        write_frame(&mut writer, &reply).await?;
        answered += 1;

        if options.exit_after.is_some_and(|n| answered >= n) {
            tracing::info!(answered, "exit-after reached, stopping");
            return Ok(ServeSummary {
                requests_answered: answered,
                stopped_by: StopReason::ExitAfter,
            });
        }
    }

    tracing::info!(answered, "stdin closed, stopping");
    Ok(ServeSummary {
        requests_answered: answered,
        stopped_by: StopReason::Eof,
    })
}

/// Build the reply for one inbound message. Notifications get none.
async fn handle_message(message: &Value, options: &ProviderOptions) -> Option<Value> {
    let id = message.get("id").cloned().filter(|v| !v.is_null());

    let Some(id) = id else {
        tracing::debug!(method = message.get("method").and_then(serde_json::Value::as_str), "notification");
        return None;
    };

    let Some(method) = message.get("method").and_then(Value::as_str) else {
        return Some(error_response(
            id,
            error_codes::INVALID_REQUEST,
            "request is missing a string 'method'",
        ));
    };
    let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
    tracing::debug!(method, %id, "request");

    let reply = match method {
        "initialize" => success_response(
            id,
            json!({
                "protocolVersion": params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(PROTOCOL_VERSION),
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVER_NAME, "version": "1.0.0" }
            }),
        ),
        "tools/list" => success_response(id, json!({ "tools": tools::catalog() })),
        "tools/call" => {
            if !options.call_delay.is_zero() {
                tokio::time::sleep(options.call_delay).await;
            }
            handle_call(id, &params)
        }
        "ping" => success_response(id, json!({})),
        other => error_response(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        ),
    };
    Some(reply)
}

fn handle_call(id: Value, params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = match params.get("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return error_response(id, error_codes::INVALID_PARAMS, "arguments must be an object");
        }
    };

    match tools::call(name, &arguments) {
        Ok(output) => {
            tracing::info!(tool = name, is_error = output.is_error, "tool called");
            success_response(
                id,
                json!({ "content": output.content, "isError": output.is_error }),
            )
        }
        Err(CallRejection::UnknownTool(tool)) => {
            error_response(id, error_codes::INVALID_PARAMS, format!("unknown tool: {tool}"))
        }
        Err(CallRejection::InvalidParams(reason)) => {
            error_response(id, error_codes::INVALID_PARAMS, reason)
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i32, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    })
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Value) -> Result<(), ProviderError> {
    let mut payload = serde_json::to_vec(frame)?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}
