//! dupmond — the dupmon daemon.
//!
//! Receives completion webhooks from the backup tool and exposes per-backup
//! result counters, recent-activity gauges and file statistics for
//! Prometheus to scrape.
//!
//! # Usage
//!
//! ```text
//! dupmond serve --listen 0.0.0.0:9090 --duplicati-url http://backup-host:8200/
//! ```

mod bootstrap;
mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dupmon_api::{ApiState, build_router};
use dupmon_metrics::{MetricsEngine, RetentionMaintainer};

use crate::config::{LogFormat, ServeArgs, Settings};

const DEFAULT_LOG_FILTER: &str = "info,dupmond=debug,dupmon=debug";

#[derive(Parser)]
#[command(name = "dupmond", version, about = "Backup webhook to Prometheus exporter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the webhook receiver and the metrics endpoint.
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let settings = Settings::resolve(&args)?;
            init_tracing(settings.log_format);
            run_serve(settings).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn run_serve(settings: Settings) -> anyhow::Result<()> {
    info!(
        listen = %settings.listen,
        window = ?settings.window,
        maintenance_interval = ?settings.maintenance_interval,
        missing_result = %settings.missing_result,
        "dupmon daemon starting"
    );

    // ── Engine ─────────────────────────────────────────────────

    let engine = Arc::new(MetricsEngine::new(settings.window)?);

    match &settings.duplicati_url {
        Some(url) => {
            bootstrap::seed_engine(&engine, url, settings.preseed_timeout).await;
        }
        None => info!("no backup server configured, series appear on first report"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Retention maintainer ───────────────────────────────────

    let maintainer = RetentionMaintainer::new(Arc::clone(&engine), settings.maintenance_interval)?;
    let maintainer_handle = tokio::spawn(async move {
        maintainer.run(shutdown_rx).await;
    });

    // ── HTTP server ────────────────────────────────────────────

    let router = build_router(ApiState::new(engine, settings.missing_result));
    let listener = tokio::net::TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!(addr = %settings.listen, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = maintainer_handle.await;

    info!("dupmon daemon stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
