//! Session-scope errors.
//!
//! Per-invocation problems never show up here; the correlator turns them
//! into `Failure` outcomes. These variants abort the pipeline, but the
//! controller still tears the provider down before returning one.

use thiserror::Error;

use crate::config::ConfigError;
use crate::inference::InferenceError;
use crate::mcp_client::McpError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The provider process could not be started or failed its handshake.
    #[error("spawn failed: {0}")]
    Spawn(#[source] McpError),

    /// The catalog exchange failed or returned a malformed catalog.
    #[error("discovery failed: {0}")]
    Discovery(#[source] McpError),

    /// The provider exited or its channel closed once the catalog was in
    /// hand (`Ready` or `Invoking`).
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The invoke phase ran past the session deadline.
    #[error("session deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    /// The reasoning backend was unreachable or rejected the request.
    #[error("backend failed: {0}")]
    Backend(#[from] InferenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Sort an `McpError` raised while opening the session (spawn,
    /// handshake or discovery) into the matching session-scope error.
    ///
    /// Losing the provider before the catalog is in hand is an opening
    /// failure, never `ConnectionLost`.
    pub fn from_open(err: McpError) -> Self {
        match err {
            e @ McpError::DiscoveryFailed { .. } => SessionError::Discovery(e),
            e => SessionError::Spawn(e),
        }
    }

    /// Whether the failure is a startup precondition rather than a runtime error.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SessionError::Config(_)
                | SessionError::Backend(InferenceError::MissingCredential { .. })
        )
    }
}
