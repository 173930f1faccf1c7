use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use collector::{Aggregator, AggregatorSettings, Collector, HttpGitlabClient, SnapshotStore};
use common::config::{AppConfig, USAGE};
use common::{logging, AppError};
use exporter::{build_router, ExporterState};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Upper bound on waiting for an in-flight cycle once the server stopped.
const COLLECTOR_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn load_config() -> Result<AppConfig, AppError> {
    let config = AppConfig::load()?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging("info");

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("{err}\n\n{USAGE}");
            std::process::exit(2);
        }
    };
    let addr = config.listen.socket_addr()?;

    let client = Arc::new(HttpGitlabClient::new(&config.gitlab)?);
    info!(base_url = %client.base_url(), "using gitlab instance");
    let store = SnapshotStore::new();
    let aggregator = Aggregator::new(client, AggregatorSettings::from_config(&config.gitlab));
    let collector = Collector::new(config.collector.clone(), aggregator, store.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector_task = tokio::spawn(async move { collector.run(shutdown_rx).await });

    let state = Arc::new(ExporterState::new(store, config.listen.path.clone())?);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, path = %config.listen.path, "exporter listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await?;

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(COLLECTOR_DRAIN_TIMEOUT, collector_task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "collector task ended abnormally"),
        Err(_) => warn!("collector did not stop in time"),
    }
    info!("exporter shutdown complete");
    Ok(())
}

async fn shutdown() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
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

    info!("shutdown signal received, stopping exporter");
}
