//! mcp-aggregator: an aggregating proxy for the Model Context Protocol.
//!
//! Exposes a single MCP endpoint to one host-side client while fanning out
//! tool calls to a dynamic set of upstream MCP servers running as
//! long-lived child processes over stdio. Upstreams from the initial
//! configuration are connected at startup; the five management tools let
//! an operator add, remove, disconnect, reconnect, and list upstreams
//! while the proxy keeps serving the host.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use mcp_aggregator::config;
use mcp_aggregator::management::ManagementTools;
use mcp_aggregator::mcp::server::McpServerAdapter;
use mcp_aggregator::recorder::RecorderSession;
use mcp_aggregator::registry::Aggregator;

/// Aggregating proxy for the Model Context Protocol.
///
/// Fans out a single MCP host connection to a dynamic set of upstream MCP
/// servers, each launched as a child process over stdio.
#[derive(Parser, Debug)]
#[command(name = "mcp-aggregator")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<std::path::PathBuf>,

    /// Path to write a JSONL recording of every request/response pair.
    /// Recording is disabled if omitted.
    #[arg(long, value_name = "FILE")]
    record: Option<std::path::PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors).
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr: stdout is the MCP wire, and any library output
/// written there would corrupt the JSON-RPC stream.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for the mcp-aggregator server.
fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        servers = cfg.servers.len(),
        "Starting mcp-aggregator"
    );

    let recorder = match args.record {
        Some(path) => match RecorderSession::start(&path, env!("CARGO_PKG_VERSION")) {
            Ok(session) => {
                info!(path = %session.path().display(), "Recording enabled");
                Some(Arc::new(session))
            }
            Err(e) => {
                error!(error = %e, "Failed to open recording file");
                return ExitCode::FAILURE;
            }
        },
        None => {
            info!("Recording disabled");
            None
        }
    };

    let parent_env: HashMap<String, String> = std::env::vars().collect();
    let aggregator = Arc::new(Aggregator::new());
    let management = Arc::new(ManagementTools::new(
        Arc::clone(&aggregator),
        cfg.inherit.clone(),
        parent_env,
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    // Multi-thread runtime: unlike a proxy talking to one subprocess
    // serially, this one runs a reader and writer task per upstream
    // client plus concurrent inbound tool-call handlers, all of which
    // need to make progress independently.
    let result = runtime.block_on(async {
        for spec in cfg.servers {
            let name = spec.name.clone();
            match management.register_static(spec).await {
                Ok(_) => info!(server = %name, "Connected static upstream"),
                Err(e) => warn!(server = %name, error = %e, "Failed to connect static upstream at startup"),
            }
        }

        let shutdown_aggregator = Arc::clone(&aggregator);
        let mut adapter = McpServerAdapter::new(aggregator, management, recorder);

        info!("MCP server ready, waiting for client connection...");

        let result = tokio::select! {
            result = adapter.run() => result,
            _ = shutdown_signal() => {
                info!("Shutdown signal received, closing upstreams");
                Ok(())
            }
        };

        close_all_upstreams(&shutdown_aggregator).await;
        result
    });

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Closes every registered upstream's child process in parallel. Called on
/// shutdown (clean EOF from the host or a signal) so no child is left
/// running after the proxy exits.
async fn close_all_upstreams(aggregator: &Aggregator) {
    let entries = aggregator.snapshot().await;
    let mut joins = tokio::task::JoinSet::new();
    for entry in entries {
        joins.spawn(async move { entry.client.close().await });
    }
    while joins.join_next().await.is_some() {}
}

/// Resolves when either SIGINT or SIGTERM is received (or, on platforms
/// without SIGTERM, only SIGINT).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
