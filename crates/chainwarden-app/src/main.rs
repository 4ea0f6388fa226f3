//! Chainwarden daemon.
//!
//! Routes package-manager traffic through the local Chainwarden proxy,
//! relays block events to the desktop UI and keeps the proxy alive.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chainwarden_app::{logging, platform, Daemon};
use chainwarden_core::DaemonConfig;
use chainwarden_proxy::{ProxyProcessConfig, ProxyProcessManager};

/// Chainwarden - package-manager security daemon
#[derive(Parser, Debug)]
#[command(name = "chainwarden", version, about)]
struct Args {
    /// Path to a JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let paths = platform::default_paths().context("failed to resolve working directories")?;
    let config = DaemonConfig::load(args.config.clone(), &args.log_level, paths)?;
    let platform = platform::current(config.paths.clone())?;

    // Keep the guard alive for the duration of the program.
    let log_file = platform
        .log_writer()
        .map_err(|e| eprintln!("chainwarden: cannot open daemon log: {e}"))
        .ok();
    let _log_guard = logging::init_logging(&config.log_level, log_file);

    info!("Starting Chainwarden {}", env!("CARGO_PKG_VERSION"));
    info!("Args: {:?}", args);

    config
        .paths
        .ensure_dirs()
        .context("failed to create log and run directories")?;

    let settings = &config.settings;
    let proxy = ProxyProcessManager::new(
        ProxyProcessConfig::from_paths(&config.paths)
            .with_ready_timeout(settings.proxy_ready_timeout())
            .with_poll_interval(settings.proxy_ready_poll_interval()),
    )?;
    let shutdown_timeout = settings.shutdown_timeout();

    let daemon = Daemon::new(config, platform, Arc::new(proxy))?;

    let runner = daemon.clone();
    let mut control = tokio::spawn(async move { runner.start(CancellationToken::new()).await });

    let outcome = tokio::select! {
        _ = shutdown_signal() => None,
        joined = &mut control => Some(joined),
    };

    if let Err(e) = daemon.stop(shutdown_timeout).await {
        warn!(error = %e, "Daemon did not stop cleanly");
    }

    match outcome {
        Some(Ok(Err(e))) => {
            error!(error = %e, "Daemon failed");
            Err(e.into())
        }
        Some(Err(e)) => Err(anyhow::Error::new(e).context("daemon task panicked")),
        Some(Ok(Ok(()))) | None => {
            info!("Chainwarden stopped");
            Ok(())
        }
    }
}
