//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility — these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the reasoning backend.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The API credential is not available. This is a startup precondition.
    #[error("missing credential: environment variable {var} is not set")]
    MissingCredential {
        var: String,
    },

    /// TCP/HTTP connection to the backend failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The backend did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the backend.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The backend answered but the body was not what we expected.
    #[error("unexpected response: {reason}")]
    ResponseError {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_message() {
        let err = InferenceError::HttpError {
            status: 529,
            body: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 529: overloaded");
    }

    #[test]
    fn test_missing_credential_message() {
        let err = InferenceError::MissingCredential {
            var: "ANTHROPIC_API_KEY".into(),
        };
        assert_eq!(
            err.to_string(),
            "missing credential: environment variable ANTHROPIC_API_KEY is not set"
        );
    }
}
