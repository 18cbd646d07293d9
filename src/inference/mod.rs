//! Inference — the reasoning backend boundary.
//!
//! The session controller talks only to the [`ReasoningBackend`] trait;
//! [`AnthropicClient`] implements it against the Messages API.

pub mod client;
pub mod errors;
pub mod types;

pub use client::{AnthropicClient, ReasoningBackend};
pub use errors::InferenceError;
