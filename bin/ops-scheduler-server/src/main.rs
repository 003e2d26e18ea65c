//! Escalation Timer Server
//!
//! Runs the heartbeat, escalation and unblock-reminder timers and serves:
//! - `/q/health`, `/q/health/live`, `/q/health/ready`
//! - `/metrics` (Prometheus)
//! - `/hubs/notifications` (Server-Sent Events, `ReceiveNotification`)
//! - `/api/notifications` queries
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OPS_CONFIG` | - | Config file path when `--config` is not given |
//! | `OPS_HTTP_PORT` | `8085` | HTTP port |
//! | `OPS_DATABASE_URL` | `sqlite://./data/ops.db?mode=rwc` | SQLite URL |
//! | `OPS_SCHEDULER_ENABLED` | `true` | Master switch for the timers |
//! | `LOG_FORMAT` | text | `json` for structured output |
//! | `RUST_LOG` | `info` | Log filter |

mod api;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use ops_config::{AppConfig, ConfigLoader, DatabaseConfig};
use ops_notify::{NotificationDispatcher, NotificationHub};
use ops_scheduler::{EscalationTimerService, TimerConfig};
use ops_store::{MemoryStore, SessionFactory, SqliteStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::AppState;

#[derive(Parser, Debug)]
#[command(name = "ops-scheduler-server", version, about = "Escalation timer server")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", AppConfig::example_toml());
        return Ok(());
    }

    ops_common::logging::init_logging("ops-scheduler-server");
    info!("Starting escalation timer server");

    let loader = match args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("Failed to load configuration")?;
    info!(
        enabled = config.scheduler.enabled,
        database = %config.database.kind,
        locale = %config.scheduler.reminder.locale,
        "Configuration loaded"
    );

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {e}"))?;

    let factory = open_store(&config.database).await?;

    let hub = NotificationHub::new(config.notifications.channel_capacity);
    let dispatcher = NotificationDispatcher::new(Arc::new(hub.clone()));
    let timer_config = TimerConfig::from_config(&config.scheduler)?;
    let scheduler = Arc::new(EscalationTimerService::new(
        timer_config,
        factory.clone(),
        dispatcher,
    )?);
    scheduler.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = api::router(AppState {
        factory,
        hub,
        scheduler: scheduler.clone(),
        metrics: Some(metrics),
        shutdown: shutdown_rx,
    })
    .layer(TraceLayer::new_for_http());

    let (host, port) = (&config.http.host, config.http.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid listen address {host}:{port}"))?;
    info!(?addr, "HTTP server starting");

    let timers_stopped = stop_timers_on_shutdown(scheduler, shutdown_tx.subscribe());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    timers_stopped.await.context("Timer shutdown task failed")?;

    info!("Escalation timer server stopped");
    Ok(())
}

/// Stops the timers alongside HTTP draining, or when the shutdown sender goes away
fn stop_timers_on_shutdown(
    scheduler: Arc<EscalationTimerService>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = shutdown.wait_for(|stopping| *stopping).await;
        scheduler.stop().await;
    })
}

async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn SessionFactory>> {
    match config.kind.as_str() {
        "sqlite" => {
            let options = SqliteConnectOptions::from_str(&config.url)
                .with_context(|| format!("Invalid SQLite URL {}", config.url))?
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(options)
                .await
                .context("Failed to connect to SQLite")?;

            let store = SqliteStore::new(pool);
            if config.init_schema {
                store.init_schema().await?;
                info!("SQLite schema initialized");
            }
            info!(url = %config.url, "Connected to SQLite");
            Ok(Arc::new(store))
        }
        "memory" => {
            warn!("Using in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => bail!("Unsupported database kind '{other}'"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Arc<EscalationTimerService> {
        let dispatcher = NotificationDispatcher::new(Arc::new(NotificationHub::new(8)));
        let factory: Arc<dyn SessionFactory> = Arc::new(MemoryStore::new());
        Arc::new(EscalationTimerService::new(TimerConfig::default(), factory, dispatcher).unwrap())
    }

    #[tokio::test]
    async fn test_timers_stop_when_shutdown_is_signalled() {
        let scheduler = scheduler();
        scheduler.start();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stopped = stop_timers_on_shutdown(scheduler.clone(), shutdown_rx);
        tokio::task::yield_now().await;
        assert!(scheduler.is_running());

        shutdown_tx.send(true).unwrap();
        stopped.await.unwrap();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_timers_stop_when_shutdown_sender_is_dropped() {
        let scheduler = scheduler();
        scheduler.start();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stopped = stop_timers_on_shutdown(scheduler.clone(), shutdown_rx);
        drop(shutdown_tx);
        stopped.await.unwrap();
        assert!(!scheduler.is_running());
    }
}
