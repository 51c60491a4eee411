//! msh - The MCP Shell
//!
//! A stdio MCP server exposing security-gated shell command sessions.
//! Create a session bound to a working directory, execute commands with
//! bounded waits, and poll the session transcript for output that arrives
//! after a timeout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use msh::{
    config::Config,
    executor::CommandExecutor,
    mcp::{MshServer, ServerState},
    security::SecurityValidator,
    session::SessionRegistry,
};

/// msh - The MCP Shell
///
/// Serves the command-session tools over stdio. All diagnostics go to
/// stderr; stdout carries the MCP protocol.
#[derive(Parser, Debug)]
#[command(name = "msh", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "MSH_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum number of concurrently active sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Seconds of inactivity before a session is expired by the sweep
    #[arg(long)]
    session_timeout: Option<u64>,

    /// Interpreter executable (overrides the config file and $SHELL)
    #[arg(long)]
    shell: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_stderr();

    let mut config = match &cli.config {
        Some(path) => match Config::load(path)? {
            Some(config) => config,
            None => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Config::default()
            }
        },
        None => Config::default(),
    };
    if let Some(n) = cli.max_sessions {
        config.limits.max_sessions = n;
    }
    if let Some(secs) = cli.session_timeout {
        config.limits.session_timeout_secs = secs;
    }
    if let Some(shell) = cli.shell {
        config.shell.program = shell;
    }

    let validator = Arc::new(SecurityValidator::new(&config.limits));
    let summary = validator.summary();
    tracing::info!(
        denied = summary.denied_commands,
        safe = summary.safe_commands,
        patterns = summary.danger_patterns,
        "security policy loaded"
    );

    let registry = SessionRegistry::new(config.limits.clone());
    registry.start_sweep();

    let executor = Arc::new(CommandExecutor::new(
        registry.clone(),
        validator,
        config.shell.clone(),
    ));

    tracing::info!(
        shell = %config.shell.program,
        max_sessions = config.limits.max_sessions,
        "msh MCP server starting on stdio"
    );

    let state = ServerState {
        registry: registry.clone(),
        executor,
    };
    let service = MshServer::new(state)
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("failed to start MCP service: {e}"))?;
    service.waiting().await?;

    registry.shutdown().await;
    tracing::info!("msh exiting");
    Ok(())
}

/// Initialize tracing with stderr output.
///
/// stdout is reserved for the MCP JSON-RPC stream, so all diagnostics
/// MUST go to stderr.
fn init_tracing_stderr() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "msh=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
