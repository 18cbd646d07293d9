//! example-provider — MCP tool provider over stdio serving `get-weather`
//! and `calculate`.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use mcp_context_client::provider::{serve, ProviderOptions};
use mcp_context_client::{init_tracing, LogSink};

#[derive(Parser, Debug)]
#[command(name = "example-provider", version, about = "Example MCP tool provider")]
struct Cli {
    /// Exit after answering this many requests.
    #[arg(long)]
    exit_after: Option<u64>,

    /// Exit without replying when a request for this method arrives.
    #[arg(long, value_name = "METHOD")]
    exit_on: Option<String>,

    /// Delay every tools/call reply by this many milliseconds.
    #[arg(long, default_value_t = 0)]
    call_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries protocol frames; diagnostics must go to stderr.
    init_tracing(LogSink::Stderr);

    let options = ProviderOptions {
        exit_after: cli.exit_after,
        exit_on: cli.exit_on,
        call_delay: Duration::from_millis(cli.call_delay_ms),
    };
    tracing::info!(?options, "MCP server started with stdio transport");

    let summary = serve(tokio::io::stdin(), tokio::io::stdout(), &options)
        .await
        .context("serving stdio")?;
    tracing::info!(answered = summary.requests_answered, stopped_by = ?summary.stopped_by, "provider exiting");

    // The runtime would otherwise wait on its pending stdin read, and the
    // client would not see EOF until it wrote again.
    if summary.stopped_by.is_injected() {
        std::process::exit(0);
    }
    Ok(())
}
