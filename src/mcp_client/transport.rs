//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with a provider child process:
//! - Writing JSON-RPC requests to stdin, one JSON object per line
//! - A single reader task that demultiplexes stdout frames to the waiter
//!   registered under the frame's `id`
//! - Failing every outstanding waiter at once when the stream closes
//!
//! The connection is generic over the byte streams so tests can drive it
//! through `tokio::io::duplex` instead of a real process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::types::{InvocationId, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Reason attached to waiters failed by a deliberate local shutdown.
pub const SESSION_CLOSED: &str = "session closed";

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Waiter = oneshot::Sender<Result<JsonRpcResponse, McpError>>;

// ─── Pending Table ───────────────────────────────────────────────────────────

/// Outstanding requests keyed by correlation id.
///
/// Once `closed` is set no new waiter can be registered, so a waiter is
/// either drained by `close` or resolved by the reader, never both.
#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u64, Waiter>,
    closed: Option<String>,
}

struct Shared {
    server_name: String,
    pending: StdMutex<PendingTable>,
    discarded_frames: AtomicU64,
    /// Woken when the connection closes.
    closed_notify: Notify,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Route one inbound frame to its waiter. Returns `false` if nobody
    /// was waiting (late response after a timeout, or an unknown id).
    fn dispatch(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id else {
            return false;
        };
        let waiter = self.table().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(response));
                true
            }
            None => {
                self.discarded_frames.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    server = %self.server_name,
                    id,
                    "discarding response with no waiter (late or unknown id)"
                );
                false
            }
        }
    }

    /// Mark the connection closed and wake every waiter with `ConnectionLost`.
    fn close(&self, reason: &str) {
        let drained: Vec<Waiter> = {
            let mut table = self.table();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.waiters.drain().map(|(_, tx)| tx).collect()
        };
        self.closed_notify.notify_waiters();

        if !drained.is_empty() {
            tracing::warn!(
                server = %self.server_name,
                outstanding = drained.len(),
                reason,
                "failing outstanding requests"
            );
        }

        for tx in drained {
            let _ = tx.send(Err(McpError::ConnectionLost {
                server: self.server_name.clone(),
                reason: reason.to_string(),
            }));
        }
    }
}

// ─── Connection ──────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC connection over a provider's stdio.
pub struct Connection {
    shared: Arc<Shared>,
    writer: Mutex<Option<BoxedWriter>>,
    frames_sent: AtomicU64,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Wrap a writer/reader pair and start the reader task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            server_name: server_name.to_string(),
            pending: StdMutex::new(PendingTable::default()),
            discarded_frames: AtomicU64::new(0),
            closed_notify: Notify::new(),
        });

        let reader_task = tokio::spawn(read_loop(Arc::clone(&shared), reader));

        Arc::new(Self {
            shared,
            writer: Mutex::new(Some(Box::new(writer))),
            frames_sent: AtomicU64::new(0),
            reader_task: StdMutex::new(Some(reader_task)),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.shared.server_name
    }

    /// Send a request under `id` and wait for the matching response.
    ///
    /// On timeout the waiter is removed, so a response arriving later is
    /// dropped by the reader instead of being matched to anything else.
    pub async fn request(
        &self,
        id: InvocationId,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let rx = self.register(id)?;

        let req = JsonRpcRequest::new(id.as_u64(), method, params);
        if let Err(e) = self.write_frame(&req).await {
            self.forget(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::ConnectionLost {
                server: self.server_name().to_string(),
                reason: "response channel dropped".into(),
            }),
            Err(_) => {
                self.forget(id);
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.write_frame(&JsonRpcNotification::new(method, params))
            .await
    }

    /// Begin a graceful close: fail outstanding waiters with `reason` and
    /// drop the writer so the provider sees EOF on stdin. Idempotent.
    pub async fn shutdown(&self, reason: &str) {
        self.shared.close(reason);
        let writer = self.writer.lock().await.take();
        if let Some(mut w) = writer {
            let _ = w.shutdown().await;
        }
    }

    /// Fail all outstanding waiters without touching the writer.
    ///
    /// Used for session-level cancellation (deadline exceeded).
    pub fn cancel_all(&self, reason: &str) {
        self.shared.close(reason);
    }

    /// Stop the reader task. Called once the process is gone.
    pub fn abort_reader(&self) {
        let handle = self
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Whether the connection can no longer carry requests.
    pub fn is_closed(&self) -> bool {
        self.shared.table().closed.is_some()
    }

    /// Resolve once the connection has closed, for any reason.
    pub async fn closed(&self) {
        let notified = self.shared.closed_notify.notified();
        tokio::pin!(notified);
        // Register before checking, so a close in between still wakes us.
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Why the connection closed, if it has.
    pub fn close_reason(&self) -> Option<String> {
        self.shared.table().closed.clone()
    }

    /// Number of requests currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.table().waiters.len()
    }

    /// Number of frames successfully written to the provider.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Number of inbound responses dropped because nobody was waiting.
    pub fn discarded_frames(&self) -> u64 {
        self.shared.discarded_frames.load(Ordering::Relaxed)
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn register(
        &self,
        id: InvocationId,
    ) -> Result<oneshot::Receiver<Result<JsonRpcResponse, McpError>>, McpError> {
        let mut table = self.shared.table();
        if let Some(reason) = &table.closed {
            return Err(McpError::ConnectionLost {
                server: self.server_name().to_string(),
                reason: reason.clone(),
            });
        }
        if table.waiters.contains_key(&id.as_u64()) {
            return Err(McpError::DuplicateInvocation { id: id.as_u64() });
        }
        let (tx, rx) = oneshot::channel();
        table.waiters.insert(id.as_u64(), tx);
        Ok(rx)
    }

    fn forget(&self, id: InvocationId) {
        self.shared.table().waiters.remove(&id.as_u64());
    }

    async fn write_frame<T: serde::Serialize>(&self, frame: &T) -> Result<(), McpError> {
        let mut json = serde_json::to_string(frame).map_err(|e| McpError::TransportError {
            server: self.server_name().to_string(),
            reason: format!("failed to serialize frame: {e}"),
        })?;
        json.push('\n');

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(McpError::ConnectionLost {
                server: self.server_name().to_string(),
                reason: self
                    .close_reason()
                    .unwrap_or_else(|| SESSION_CLOSED.to_string()),
            });
        };

        let written = async {
            writer.write_all(json.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let reason = format!("failed to write to provider stdin: {e}");
                self.shared.close(&reason);
                Err(McpError::ConnectionLost {
                    server: self.server_name().to_string(),
                    reason,
                })
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.abort_reader();
    }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// The single reader: one line in, at most one waiter woken.
async fn read_loop<R>(shared: Arc<Shared>, reader: R)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut line_buf = String::new();

    let reason = loop {
        line_buf.clear();
        match reader.read_line(&mut line_buf).await {
            Ok(0) => break "provider stdout closed (process may have exited)".to_string(),
            Ok(_) => {}
            Err(e) => break format!("failed to read from provider stdout: {e}"),
        }

        let trimmed = line_buf.trim();
        if trimmed.is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                // Providers sometimes print banners to stdout.
                tracing::debug!(server = %shared.server_name, line = trimmed, "non-JSON stdout line");
                continue;
            }
        };

        if value.get("method").is_some() {
            tracing::debug!(
                server = %shared.server_name,
                method = value["method"].as_str().unwrap_or(""),
                "ignoring provider-initiated message"
            );
            continue;
        }

        match serde_json::from_value::<JsonRpcResponse>(value) {
            Ok(resp) => {
                shared.dispatch(resp);
            }
            Err(e) => {
                tracing::debug!(server = %shared.server_name, error = %e, "unparseable frame");
            }
        }
    };

    tracing::info!(server = %shared.server_name, reason = %reason, "reader finished");
    shared.close(&reason);
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeProvider;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_request_matches_response_by_id() {
        let (conn, mut provider) = FakeProvider::connect("fake");
        let id = InvocationId::next();

        let call = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.request(id, "tools/list", None, WAIT).await }
        });

        let req = provider.next_request().await;
        assert_eq!(req.id, id.as_u64());
        assert_eq!(req.method, "tools/list");
        provider.reply(req.id, json!({"tools": []})).await;

        let resp = call.await.unwrap().unwrap();
        assert_eq!(resp.id, Some(id.as_u64()));
        assert_eq!(conn.frames_sent(), 1);
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_noise_lines_are_skipped() {
        let (conn, mut provider) = FakeProvider::connect("fake");
        let id = InvocationId::next();

        let call = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.request(id, "ping", None, WAIT).await }
        });

        let req = provider.next_request().await;
        provider.send_raw("MCP Server started with stdio transport").await;
        provider
            .send_raw(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#)
            .await;
        provider.send_raw("").await;
        provider.reply(req.id, json!({})).await;

        assert!(call.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_is_discarded() {
        let (conn, mut provider) = FakeProvider::connect("fake");
        let slow = InvocationId::next();

        let err = {
            let conn = Arc::clone(&conn);
            let call = tokio::spawn(async move {
                conn.request(slow, "tools/call", None, Duration::from_millis(50))
                    .await
            });
            let _ = provider.next_request().await;
            call.await.unwrap().unwrap_err()
        };
        assert!(matches!(err, McpError::Timeout { timeout_ms: 50, .. }));
        assert_eq!(conn.pending_count(), 0);

        // The late answer arrives, followed by a fresh call.
        provider.reply(slow.as_u64(), json!({"late": true})).await;

        let fresh = InvocationId::next();
        let call = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.request(fresh, "tools/call", None, WAIT).await }
        });
        let req = provider.next_request().await;
        provider.reply(req.id, json!({"late": false})).await;

        let resp = call.await.unwrap().unwrap();
        assert_eq!(resp.id, Some(fresh.as_u64()));
        assert_eq!(resp.result.unwrap()["late"], false);
        assert_eq!(conn.discarded_frames(), 1);
    }

    #[tokio::test]
    async fn test_eof_fails_all_waiters() {
        let (conn, mut provider) = FakeProvider::connect("fake");

        let a = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.request(InvocationId::next(), "a", None, WAIT).await }
        });
        let b = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.request(InvocationId::next(), "b", None, WAIT).await }
        });
        let _ = provider.next_request().await;
        let _ = provider.next_request().await;
        drop(provider);

        assert!(a.await.unwrap().unwrap_err().is_connection_lost());
        assert!(b.await.unwrap().unwrap_err().is_connection_lost());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_closed_resolves_on_eof() {
        let (conn, provider) = FakeProvider::connect("fake");

        let waiting = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.closed().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(provider);
        tokio::time::timeout(WAIT, waiting).await.unwrap().unwrap();
        // Already closed: returns at once.
        tokio::time::timeout(WAIT, conn.closed()).await.unwrap();
        assert!(conn.close_reason().unwrap().contains("stdout closed"));
    }

    #[tokio::test]
    async fn test_requests_after_close_fail_fast() {
        let (conn, _provider) = FakeProvider::connect("fake");
        conn.shutdown(SESSION_CLOSED).await;
        conn.shutdown(SESSION_CLOSED).await;

        let err = conn
            .request(InvocationId::next(), "tools/list", None, WAIT)
            .await
            .unwrap_err();
        assert!(err.is_connection_lost());
        assert_eq!(conn.frames_sent(), 0);
        assert_eq!(conn.close_reason().as_deref(), Some(SESSION_CLOSED));
    }

    #[tokio::test]
    async fn test_duplicate_invocation_id_rejected() {
        let (conn, mut provider) = FakeProvider::connect("fake");
        let id = InvocationId::next();

        let first = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.request(id, "tools/call", None, WAIT).await }
        });
        let req = provider.next_request().await;

        let err = conn.request(id, "tools/call", None, WAIT).await.unwrap_err();
        assert!(matches!(err, McpError::DuplicateInvocation { .. }));

        provider.reply(req.id, json!({})).await;
        assert!(first.await.unwrap().is_ok());
        assert_eq!(conn.frames_sent(), 1);
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse::failure(1, -32601, "Method not found");
        match extract_result(resp).unwrap_err() {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_result_missing_both() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: Some(1),
            result: None,
            error: None,
        };
        assert!(matches!(
            extract_result(resp).unwrap_err(),
            McpError::ServerError { .. }
        ));
    }
}
