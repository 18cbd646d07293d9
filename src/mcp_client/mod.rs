//! MCP Client — JSON-RPC over stdio transport to a single tool provider.
//!
//! This module handles:
//! - Spawning the provider child process and the initialize handshake
//! - JSON-RPC 2.0 framing over process stdio, with one reader task
//!   demultiplexing responses by correlation id
//! - Tool discovery and argument validation
//! - Tool call dispatch, timeouts, and outcome correlation
//!
//! The session controller drives these pieces in order; none of them
//! knows about the reasoning backend.

pub mod correlator;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use correlator::{CompletedInvocation, InvocationCorrelator, InvocationOutcome, InvocationRequest};
pub use errors::McpError;
pub use lifecycle::{spawn_provider, LaunchSettings, ManagedProvider, TeardownReport};
pub use registry::{ArgumentCheck, ToolRegistry};
pub use transport::Connection;
pub use types::{ContentBlock, InvocationId, ServerConfig, ToolDescriptor};
