//! Reasoning backend client.
//!
//! The session hands the rendered tool evidence and the user's query to a
//! [`ReasoningBackend`] exactly once. [`AnthropicClient`] is the production
//! implementation, a single non-streaming call to the Messages API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::types::{Message, MessagesRequest, MessagesResponse};
use crate::config::BackendConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ReasoningBackend ────────────────────────────────────────────────────────

/// The text-generation service that consumes aggregated evidence.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Answer `user_query` with `system_context` as the system prompt.
    async fn complete(&self, system_context: &str, user_query: &str)
        -> Result<String, InferenceError>;

    /// Short label for logs.
    fn describe(&self) -> String {
        "reasoning backend".to_string()
    }
}

// ─── AnthropicClient ─────────────────────────────────────────────────────────

/// Messages API client.
pub struct AnthropicClient {
    http: HttpClient,
    config: BackendConfig,
    api_key: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    /// Build a client, reading the API key from `config.api_key_env`.
    ///
    /// A missing or empty key is a startup precondition failure.
    pub fn from_config(config: BackendConfig) -> Result<Self, InferenceError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| InferenceError::MissingCredential {
                var: config.api_key_env.clone(),
            })?;
        Self::with_api_key(config, api_key)
    }

    /// Build a client with an explicit API key.
    pub fn with_api_key(
        config: BackendConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, InferenceError> {
        if config.max_tokens == 0 {
            return Err(InferenceError::ConfigError {
                reason: "backend.max_tokens must be positive".into(),
            });
        }

        let request_timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            api_key: api_key.into(),
            request_timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.request_timeout.as_secs(),
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ReasoningBackend for AnthropicClient {
    async fn complete(
        &self,
        system_context: &str,
        user_query: &str,
    ) -> Result<String, InferenceError> {
        let url = self.endpoint();
        let body = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: (!system_context.is_empty()).then(|| system_context.to_string()),
            messages: vec![Message::user(user_query)],
        };

        tracing::info!(
            url = %url,
            model = %body.model,
            max_tokens = body.max_tokens,
            system_chars = system_context.len(),
            query_chars = user_query.len(),
            "=== LLM REQUEST ==="
        );

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body_text, "backend rejected request");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let parsed: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| InferenceError::ResponseError {
                    reason: format!("invalid response body: {e}"),
                })?;

        let text = parsed.text();
        tracing::info!(
            id = parsed.id.as_deref().unwrap_or("-"),
            stop_reason = parsed.stop_reason.as_deref().unwrap_or("-"),
            output_tokens = parsed.usage.map(|u| u.output_tokens).unwrap_or(0),
            response_chars = text.len(),
            "=== LLM RESPONSE ==="
        );

        if text.is_empty() {
            return Err(InferenceError::ResponseError {
                reason: "response contained no text blocks".into(),
            });
        }
        Ok(text)
    }

    fn describe(&self) -> String {
        format!("anthropic:{}", self.config.model)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> BackendConfig {
        BackendConfig {
            base_url: format!("{}/v1", server.uri()),
            request_timeout_secs: 5,
            ..BackendConfig::default()
        }
    }

    #[test]
    fn test_missing_credential() {
        let config = BackendConfig {
            api_key_env: "__MCP_TEST_UNSET_API_KEY__".into(),
            ..BackendConfig::default()
        };
        std::env::remove_var("__MCP_TEST_UNSET_API_KEY__");
        let err = AnthropicClient::from_config(config).unwrap_err();
        assert!(matches!(err, InferenceError::MissingCredential { var } if var == "__MCP_TEST_UNSET_API_KEY__"));
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        let config = BackendConfig {
            max_tokens: 0,
            ..BackendConfig::default()
        };
        let err = AnthropicClient::with_api_key(config, "k").unwrap_err();
        assert!(matches!(err, InferenceError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn test_complete_sends_system_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-3-haiku-20240307",
                "max_tokens": 1000,
                "system": "Tool: calculate",
                "messages": [{"role": "user", "content": "what's 15 + 25?"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_01",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "15 + 25 is 40."}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 20, "output_tokens": 8}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key(config_for(&server), "test-key").unwrap();
        let text = client
            .complete("Tool: calculate", "what's 15 + 25?")
            .await
            .unwrap();
        assert_eq!(text, "15 + 25 is 40.");
    }

    #[tokio::test]
    async fn test_http_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"type":"error","error":{"type":"authentication_error"}}"#),
            )
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key(config_for(&server), "bad").unwrap();
        let err = client.complete("ctx", "q").await.unwrap_err();
        match err {
            InferenceError::HttpError { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("authentication_error"));
            }
            other => panic!("expected HttpError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_response_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key(config_for(&server), "k").unwrap();
        let err = client.complete("ctx", "q").await.unwrap_err();
        assert!(matches!(err, InferenceError::ResponseError { .. }));
    }

    #[tokio::test]
    async fn test_empty_content_is_response_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"content": []})),
            )
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key(config_for(&server), "k").unwrap();
        let err = client.complete("ctx", "q").await.unwrap_err();
        assert!(matches!(err, InferenceError::ResponseError { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connection_failed() {
        let config = BackendConfig {
            base_url: "http://127.0.0.1:1/v1".into(),
            request_timeout_secs: 2,
            ..BackendConfig::default()
        };
        let client = AnthropicClient::with_api_key(config, "k").unwrap();
        let err = client.complete("ctx", "q").await.unwrap_err();
        assert!(
            matches!(err, InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. }),
            "got {err:?}"
        );
    }
}
