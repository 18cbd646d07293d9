//! Test helpers: a scripted provider on the far end of an in-memory pipe.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf};
use tokio::io::DuplexStream;

use crate::mcp_client::transport::Connection;
use crate::mcp_client::types::{JsonRpcRequest, JsonRpcResponse};

/// The provider side of a duplex pipe. Tests read the client's requests and
/// answer them in whatever order the scenario needs. Dropping it closes the
/// pipe, which the client sees as the provider exiting.
pub struct FakeProvider {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeProvider {
    pub fn connect(name: &str) -> (Arc<Connection>, FakeProvider) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let conn = Connection::new(name, client_write, client_read);
        let provider = FakeProvider {
            lines: BufReader::new(server_read).lines(),
            writer: server_write,
        };
        (conn, provider)
    }

    /// Next request from the client, skipping notifications.
    pub async fn next_request(&mut self) -> JsonRpcRequest {
        tokio::time::timeout(Duration::from_secs(5), self.read_request())
            .await
            .expect("client sent no request within 5s")
    }

    /// Like `next_request`, but gives up after `wait`.
    pub async fn try_next_request(&mut self, wait: Duration) -> Option<JsonRpcRequest> {
        tokio::time::timeout(wait, self.read_request()).await.ok()
    }

    async fn read_request(&mut self) -> JsonRpcRequest {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .expect("read from client")
                .expect("client closed the pipe");
            let value: serde_json::Value = serde_json::from_str(&line).expect("client sent JSON");
            if value.get("id").is_some() {
                return serde_json::from_value(value).expect("well-formed request");
            }
        }
    }

    pub async fn reply(&mut self, id: u64, result: serde_json::Value) {
        self.send(&JsonRpcResponse::success(id, result)).await;
    }

    pub async fn reply_error(&mut self, id: u64, code: i32, message: &str) {
        self.send(&JsonRpcResponse::failure(id, code, message)).await;
    }

    /// Reply to a `tools/call` with a single text block.
    pub async fn reply_text(&mut self, id: u64, text: &str) {
        self.reply(
            id,
            serde_json::json!({"content": [{"type": "text", "text": text}]}),
        )
        .await;
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
        self.writer.write_all(b"\n").await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    async fn send(&mut self, response: &JsonRpcResponse) {
        let json = serde_json::to_string(response).expect("serialize");
        self.send_raw(&json).await;
    }
}

/// Catalog used across tests: the two tools of the example provider.
pub fn demo_catalog() -> serde_json::Value {
    serde_json::json!({
        "tools": [
            {
                "name": "get-weather",
                "description": "Get the current weather for a location",
                "inputSchema": {
                    "type": "object",
                    "properties": {"location": {"type": "string"}},
                    "required": ["location"]
                }
            },
            {
                "name": "calculate",
                "description": "Perform a simple calculation",
                "inputSchema": {
                    "type": "object",
                    "properties": {"expression": {"type": "string"}},
                    "required": ["expression"]
                }
            }
        ]
    })
}
