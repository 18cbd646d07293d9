//! Client configuration loading.
//!
//! Reads an optional YAML file and resolves environment variables. Every
//! field has a default, so running without a config file is the normal case.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::mcp_client::correlator::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_CONCURRENT_CALLS};
use crate::mcp_client::lifecycle::{LaunchSettings, DEFAULT_INIT_TIMEOUT, DEFAULT_SHUTDOWN_GRACE};
use crate::mcp_client::types::ServerConfig;
use crate::session::plan::PlannedCall;

/// Env var naming a config file when `--config` is not given.
pub const CONFIG_ENV_VAR: &str = "MCP_CONTEXT_CLIENT_CONFIG";

/// Configuration loading or validation error.
#[derive(Debug, Error)]
#[error("config error: {reason}")]
pub struct ConfigError {
    pub reason: String,
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Explicit provider launch command. When absent the CLI builds one
    /// from the provider script path.
    pub provider: Option<ServerConfig>,
    pub backend: BackendConfig,
    pub session: SessionSettings,
    /// Tool calls to make before querying the backend. `None` means the
    /// built-in demo plan.
    pub plan: Option<Vec<PlannedCall>>,
}

/// Reasoning backend (Anthropic Messages API) settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub api_version: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 1000,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            api_version: "2023-06-01".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Session timing and concurrency settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub call_timeout_ms: u64,
    pub init_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub max_concurrent_calls: usize,
    /// Overall budget for the invoke phase. When it runs out every call
    /// still waiting is failed with "session closed".
    pub deadline_ms: Option<u64>,
    /// How long the session waits in `Ready` for a provider that exits
    /// right after answering `tools/list`, before any call is dispatched.
    pub ready_settle_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT.as_millis() as u64,
            init_timeout_ms: DEFAULT_INIT_TIMEOUT.as_millis() as u64,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE.as_millis() as u64,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            deadline_ms: None,
            ready_settle_ms: 50,
        }
    }
}

impl SessionSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn ready_settle(&self) -> Duration {
        Duration::from_millis(self.ready_settle_ms)
    }

    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            init_timeout: Duration::from_millis(self.init_timeout_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Pick the config file: the explicit path if given, else `$MCP_CONTEXT_CLIENT_CONFIG`.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    std::env::var(CONFIG_ENV_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| PathBuf::from(expand_tilde(&v)))
}

/// Load the config file at `path`, or defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    parse_config(&raw).map_err(|e| ConfigError {
        reason: format!("{}: {}", path.display(), e.reason),
    })
}

/// Parse config text after `${VAR}` interpolation.
pub fn parse_config(raw: &str) -> Result<ClientConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw).map_err(|reason| ConfigError { reason })?;
    if interpolated.trim().is_empty() {
        return Ok(ClientConfig::default());
    }

    let config: ClientConfig = serde_yaml::from_str(&interpolated).map_err(|e| ConfigError {
        reason: format!("failed to parse config: {e}"),
    })?;

    if config.session.max_concurrent_calls == 0 {
        return Err(ConfigError {
            reason: "session.max_concurrent_calls must be at least 1".into(),
        });
    }
    if let Some(provider) = &config.provider {
        if provider.command.trim().is_empty() {
            return Err(ConfigError {
                reason: "provider.command must not be empty".into(),
            });
        }
    }

    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in config text.
///
/// A `${` with no closing brace, or with no variable name, is an error
/// naming the 1-based line it starts on.
fn interpolate_env_vars(input: &str) -> Result<String, String> {
    let mut result = String::with_capacity(input.len());

    for (index, line) in input.split_inclusive('\n').enumerate() {
        let mut rest = line;
        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(format!("line {}: unterminated '${{' in config", index + 1));
            };
            let expr = &after[..end];
            result.push_str(&resolve_var_expr(expr).map_err(|e| format!("line {}: {e}", index + 1))?);
            rest = &after[end + 1..];
        }
        result.push_str(rest);
    }

    Ok(result)
}

/// Resolve `VAR` or `VAR:-default`. Unset variables without a default
/// become the empty string.
fn resolve_var_expr(expr: &str) -> Result<String, String> {
    let (var_name, default) = match expr.split_once(":-") {
        Some((name, default)) => (name.trim(), Some(default)),
        None => (expr.trim(), None),
    };
    if var_name.is_empty() {
        return Err(format!("empty variable name in '${{{expr}}}'"));
    }
    Ok(match (std::env::var(var_name), default) {
        (Ok(value), _) => value,
        (Err(_), Some(default)) => expand_tilde(default),
        (Err(_), None) => String::new(),
    })
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
