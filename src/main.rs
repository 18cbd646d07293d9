//! mcp-context-client — connect to a tool provider over stdio, run the tool
//! plan, and ask the reasoning backend a question with the results as context.
//!
//! Exit codes: 0 success, 1 session failure, 2 usage or startup precondition.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use thiserror::Error;

use mcp_context_client::config::{find_config_path, load_config, ConfigError};
use mcp_context_client::inference::{AnthropicClient, InferenceError, ReasoningBackend};
use mcp_context_client::mcp_client::ServerConfig;
use mcp_context_client::session::{
    default_plan, SessionController, SessionError, SessionOptions, SessionState,
};
use mcp_context_client::{init_tracing, LogSink};

const DEFAULT_QUERY: &str =
    "What can you tell me about the weather in New York and what's 15 + 25?";

/// Demo MCP client.
#[derive(Parser, Debug)]
#[command(name = "mcp-context-client", version, about)]
struct Cli {
    /// Provider script or executable (`.js` runs under node, `.py` under python3).
    /// Optional when the config file defines `provider`.
    provider: Option<String>,

    /// Question for the reasoning backend.
    query: Option<String>,

    /// YAML config file (default: $MCP_CONTEXT_CLIENT_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-call timeout in milliseconds.
    #[arg(long)]
    call_timeout_ms: Option<u64>,

    /// Budget for the whole invoke phase in milliseconds.
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Backend model name.
    #[arg(long)]
    model: Option<String>,

    /// Log to stderr instead of the rotating log file.
    #[arg(long)]
    log_stderr: bool,
}

#[derive(Debug, Error)]
#[error("{0}")]
struct UsageError(String);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let sink = if cli.log_stderr {
        LogSink::Stderr
    } else {
        LogSink::File
    };
    init_tracing(sink);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "client exiting with error");
            eprintln!("error: {err:#}");
            if is_precondition(&err) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = find_config_path(cli.config.as_deref());
    let mut config = load_config(config_path.as_deref()).context("loading configuration")?;

    if let Some(ms) = cli.call_timeout_ms {
        config.session.call_timeout_ms = ms;
    }
    if let Some(ms) = cli.deadline_ms {
        config.session.deadline_ms = Some(ms);
    }
    if let Some(model) = cli.model {
        config.backend.model = model;
    }

    let provider = match (cli.provider.as_deref(), config.provider.take()) {
        (Some(path), _) => ServerConfig::for_script(path),
        (None, Some(configured)) => configured,
        (None, None) => {
            return Err(UsageError(
                "usage: mcp-context-client <provider_script> [query] (or set provider in the config file)".into(),
            )
            .into())
        }
    };
    let query = cli.query.unwrap_or_else(|| DEFAULT_QUERY.to_string());

    // Checked before anything is spawned.
    let backend: Arc<dyn ReasoningBackend> =
        Arc::new(AnthropicClient::from_config(config.backend.clone()).context("reasoning backend")?);

    let options = SessionOptions {
        provider,
        settings: config.session.clone(),
        plan: config.plan.clone().unwrap_or_else(default_plan),
    };
    let mut controller = SessionController::new(options, backend);
    let result = controller.run(&query).await;

    if controller.history().contains(&SessionState::Ready) {
        println!("Available tools:\n{}\n", controller.registry().describe());
    }

    let report = result.with_context(|| format!("session {} failed", controller.id()))?;

    println!(
        "Executed {} tool call(s): {} succeeded, {} failed",
        report.invocations,
        report.evidence.len(),
        report.failures.len()
    );
    for (tool, message) in &report.failures {
        println!("  - {tool}: {message}");
    }
    println!("\nQuery: {query}\n");
    println!("Response:\n{}", report.response);

    tracing::info!(
        session_id = %report.session_id,
        state = %report.final_state,
        forced_kill = report.teardown.forced_kill,
        "session complete"
    );
    Ok(())
}

fn is_precondition(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<UsageError>().is_some() || err.downcast_ref::<ConfigError>().is_some() {
        return true;
    }
    if let Some(InferenceError::MissingCredential { .. } | InferenceError::ConfigError { .. }) =
        err.downcast_ref::<InferenceError>()
    {
        return true;
    }
    err.downcast_ref::<SessionError>()
        .is_some_and(SessionError::is_precondition)
}
