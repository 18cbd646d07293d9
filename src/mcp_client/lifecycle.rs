//! Provider process lifecycle management.
//!
//! Spawns the provider child process, wires its stdio into a [`Connection`],
//! runs the MCP initialization handshake, and tears everything down in a
//! fixed order: close stdin, wait a grace period, then kill.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::transport::{extract_result, Connection, SESSION_CLOSED};
use super::types::{InitializeResult, InvocationId, ServerConfig, ServerInfo, PROTOCOL_VERSION};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default timeout for the initialize handshake.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default grace period between closing stdin and force-killing.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How many trailing stderr lines are kept for error reports.
const STDERR_TAIL_LINES: usize = 50;

/// How long to wait for stderr to drain after a failed handshake.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Client identity sent in `initialize`.
const CLIENT_NAME: &str = "mcp-context-client";

// ─── Launch Settings ─────────────────────────────────────────────────────────

/// Timing knobs for spawn and teardown.
#[derive(Debug, Clone, Copy)]
pub struct LaunchSettings {
    pub init_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

// ─── Stderr Capture ──────────────────────────────────────────────────────────

/// Bounded tail of the provider's stderr, shared with the forwarding task.
#[derive(Clone, Default)]
pub struct StderrTail {
    lines: Arc<StdMutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The captured lines joined with newlines.
    pub fn snapshot(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Forward stderr to the log, line by line. Never parsed as protocol data.
fn forward_stderr(name: &str, stderr: ChildStderr, tail: StderrTail) -> JoinHandle<()> {
    let name = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(target: "provider_stderr", server = %name, "{line}");
            tail.push(line);
        }
    })
}

// ─── Teardown Report ─────────────────────────────────────────────────────────

/// What happened when the provider was shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    /// The process is confirmed gone (reaped).
    pub process_exited: bool,
    /// The grace period expired and the process was killed.
    pub forced_kill: bool,
    /// Exit status as reported by the OS, if known.
    pub exit_status: Option<String>,
    /// The connection refuses new requests.
    pub connection_closed: bool,
}

// ─── ManagedProvider ─────────────────────────────────────────────────────────

/// A running provider process and the connection layered on top of it.
///
/// The process handle never leaves this struct; other components only get
/// the connection, as a shared read-only capability.
pub struct ManagedProvider {
    name: String,
    process: Child,
    pid: Option<u32>,
    connection: Arc<Connection>,
    server_info: ServerInfo,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    shutdown_grace: Duration,
    teardown: Option<TeardownReport>,
}

impl ManagedProvider {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The connection to the provider.
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// OS process id, if the platform reported one at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Everything the provider has written to stderr recently.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.snapshot()
    }

    /// Check if the provider process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(None))
    }

    /// Shut down the connection and the process. Idempotent: repeated calls
    /// return the report from the first one.
    pub async fn shutdown(&mut self) -> TeardownReport {
        if let Some(report) = &self.teardown {
            return report.clone();
        }

        // EOF on stdin is the stdio transport's close signal.
        self.connection.shutdown(SESSION_CLOSED).await;

        let (status, forced_kill) =
            match tokio::time::timeout(self.shutdown_grace, self.process.wait()).await {
                Ok(Ok(status)) => (Some(status), false),
                _ => {
                    tracing::warn!(
                        server = %self.name,
                        grace_ms = self.shutdown_grace.as_millis() as u64,
                        "provider did not exit in time, killing"
                    );
                    if let Err(e) = self.process.kill().await {
                        tracing::warn!(server = %self.name, error = %e, "kill failed");
                    }
                    (self.process.try_wait().ok().flatten(), true)
                }
            };

        self.connection.abort_reader();
        if let Some(task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await.is_err() {
                tracing::debug!(server = %self.name, "stderr forwarder still running after teardown");
            }
        }

        let report = TeardownReport {
            process_exited: status.is_some(),
            forced_kill,
            exit_status: status.map(|s| s.to_string()),
            connection_closed: self.connection.is_closed(),
        };
        tracing::info!(
            server = %self.name,
            forced_kill = report.forced_kill,
            exit_status = ?report.exit_status,
            "provider shut down"
        );
        self.teardown = Some(report.clone());
        report
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a provider and perform the initialization handshake.
///
/// Never returns a half-open provider: if the handshake fails the process
/// is killed and the error carries whatever it wrote to stderr.
pub async fn spawn_provider(
    config: &ServerConfig,
    settings: LaunchSettings,
) -> Result<ManagedProvider, McpError> {
    let name = config.display_name();

    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(dir) = &config.cwd {
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(server = %name, command = %config.command, args = ?config.args, "spawning provider");

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.clone(),
        reason: format!("{e}"),
        diagnostics: String::new(),
    })?;
    let pid = child.id();

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.kill().await;
        return Err(McpError::SpawnFailed {
            name,
            reason: "failed to capture stdio".into(),
            diagnostics: String::new(),
        });
    };

    let stderr_tail = StderrTail::default();
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| forward_stderr(&name, stderr, stderr_tail.clone()));

    let connection = Connection::new(&name, stdin, stdout);

    match initialize(&connection, settings.init_timeout).await {
        Ok(server_info) => {
            tracing::info!(
                server = %name,
                pid = ?pid,
                provider_name = ?server_info.name,
                provider_version = ?server_info.version,
                "provider connected"
            );
            Ok(ManagedProvider {
                name,
                process: child,
                pid,
                connection,
                server_info,
                stderr_tail,
                stderr_task,
                shutdown_grace: settings.shutdown_grace,
                teardown: None,
            })
        }
        Err(e) => {
            connection.shutdown(SESSION_CLOSED).await;
            let _ = child.kill().await;
            connection.abort_reader();
            if let Some(task) = stderr_task {
                let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await;
            }
            let diagnostics = stderr_tail.snapshot();
            if !diagnostics.is_empty() {
                tracing::warn!(server = %name, stderr = %diagnostics, "provider stderr captured on failure");
            }
            Err(McpError::SpawnFailed {
                name,
                reason: format!("handshake failed: {e}"),
                diagnostics,
            })
        }
    }
}

/// Perform the MCP initialization handshake.
async fn initialize(connection: &Connection, timeout: Duration) -> Result<ServerInfo, McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let response = connection
        .request(InvocationId::next(), "initialize", Some(params), timeout)
        .await?;
    let result = extract_result(response)?;

    let init: InitializeResult =
        serde_json::from_value(result).map_err(|e| McpError::TransportError {
            server: connection.server_name().to_string(),
            reason: format!("failed to parse initialize response: {e}"),
        })?;

    connection.notify("notifications/initialized", None).await?;

    Ok(init.server_info.unwrap_or_default())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
