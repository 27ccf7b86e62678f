//! SSE chat gateway.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! sse-chat-gateway config/gateway.toml
//!
//! # With environment variables
//! GATEWAY_LISTEN_ADDR=0.0.0.0:8000 sse-chat-gateway
//!
//! # Remote inference
//! LLM_MODE=openai OPENAI_API_KEY=sk-... sse-chat-gateway
//! ```

use std::path::PathBuf;

use clap::Parser;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sse_chat_gateway::{
    backend::create_backend,
    config::{Config, LoggingConfig},
    metrics::{init_metrics, start_metrics_server},
    server::{bind, run_server, AppState},
    shutdown::ShutdownCoordinator,
};

/// Streams chat answers to HTTP clients as Server-Sent Events.
#[derive(Parser, Debug)]
#[command(name = "sse-chat-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Override listen address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Override backend provider (mock, local, openai).
    #[arg(short, long)]
    backend: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_ref())?;

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(backend) = args.backend {
        config.backend.provider = backend;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;
    raise_fd_limit();

    tracing::info!(
        listen_addr = %config.server.listen_addr,
        backend = %config.backend.provider,
        max_streams = config.server.max_streams,
        cors_origins = ?config.cors.allowed_origins,
        "Starting SSE chat gateway"
    );

    init_metrics();
    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.parse()?;
        start_metrics_server(addr).await?;
    }

    let backend = create_backend(&config.backend)?;
    tracing::info!(backend = backend.name(), "Backend initialized");

    let shutdown = ShutdownCoordinator::new();
    let listener = bind(&config.server.listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Gateway listening");

    let drain_timeout = config.server.shutdown_timeout();
    let state = AppState::new(config, backend, shutdown.clone());
    let mut server = tokio::spawn(run_server(listener, state));

    tokio::select! {
        _ = handle_signals(shutdown.clone()) => {}
        result = &mut server => {
            // The server only returns on its own when accept fails.
            shutdown.shutdown();
            result??;
            return Ok(());
        }
    }

    tracing::info!(
        active = shutdown.active_streams(),
        timeout_secs = drain_timeout.as_secs(),
        "Waiting for streams to drain"
    );

    match tokio::time::timeout(drain_timeout, shutdown.wait_for_drain()).await {
        Ok(()) => tracing::info!("All streams drained"),
        Err(_) => tracing::warn!(
            active = shutdown.active_streams(),
            "Shutdown timeout reached, forcing exit"
        ),
    }

    match tokio::time::timeout(drain_timeout, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Server error during shutdown"),
        Ok(Err(e)) => tracing::error!(error = %e, "Server task failed"),
        Err(_) => {
            tracing::warn!("Connections still open, aborting server");
            server.abort();
        }
    }

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Initialize logging with tracing.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Raise the open-file soft limit so many concurrent streams fit.
fn raise_fd_limit() {
    const DESIRED_LIMIT: u64 = 65_536;

    let (soft, hard) = match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok(limits) => limits,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read fd limit");
            return;
        }
    };

    let target = DESIRED_LIMIT.min(hard as u64);
    if (soft as u64) >= target {
        return;
    }

    match setrlimit(Resource::RLIMIT_NOFILE, target as _, hard) {
        Ok(()) => tracing::debug!(from = soft as u64, to = target, "Raised fd limit"),
        Err(e) => tracing::warn!(error = %e, "Could not raise fd limit"),
    }
}

/// Wait for a termination signal and broadcast shutdown.
///
/// SIGHUP only logs a status report.
async fn handle_signals(shutdown: ShutdownCoordinator) {
    let (mut sigint, mut sigterm, mut sighup) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(i), Ok(t), Ok(h)) => (i, t, h),
        _ => {
            tracing::error!("Failed to register signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            shutdown.shutdown();
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
                break;
            }
            _ = sighup.recv() => {
                tracing::info!(
                    active_streams = shutdown.active_streams(),
                    "Received SIGHUP, status report"
                );
            }
        }
    }

    shutdown.shutdown();
}
