//! Market-data collector entry point.

mod config;

use anyhow::Result;
use common::Platform;
use config::Config;
use engine::{Engine, SnapshotWriter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use store::PgStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tasks still running after this deadline are abandoned.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Config::from_env()?;
    info!("starting collector");

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], cfg.metrics_port))
        .install()?;
    info!(port = cfg.metrics_port, "prometheus exporter listening");

    let store = Arc::new(PgStore::connect(&cfg.database_url, cfg.database_pool_size).await?);
    let engine = Engine::new();
    let cancel = CancellationToken::new();

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    tasks.push({
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(cancel).await })
    });

    if cfg.snapshot_depth > 0 {
        let writer = SnapshotWriter::new(
            engine.clone(),
            Arc::clone(&store),
            cfg.snapshot_interval,
            cfg.snapshot_depth,
        );
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { writer.run(cancel).await }));
    } else {
        info!("snapshotting disabled (depth 0)");
    }

    let platforms: Vec<Arc<dyn Platform>> = vec![Arc::new(polymarket::Polymarket::new(
        polymarket::Config {
            ws_url: cfg.polymarket_ws_url.clone(),
            clob_url: cfg.polymarket_clob_url.clone(),
            market_sync_interval: cfg.market_sync_interval,
        },
        Arc::clone(&store),
        engine.clone(),
    ))];

    for platform in &platforms {
        let platform = Arc::clone(platform);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let name = platform.name();
            match platform.start(cancel.clone()).await {
                Ok(()) => info!(platform = name, "platform stopped"),
                Err(error) => error!(platform = name, %error, "platform failed"),
            }
            // a dead platform takes the process down with it; the
            // supervisor outside decides whether to restart
            cancel.cancel();
        }));
    }

    tokio::select! {
        _ = shutdown_signal() => info!("shutdown signal received"),
        _ = cancel.cancelled() => info!("platform exited, shutting down"),
    }
    cancel.cancel();

    for platform in &platforms {
        if let Err(error) = platform.stop().await {
            warn!(platform = platform.name(), %error, "failed to stop platform cleanly");
        }
    }

    if tokio::time::timeout(SHUTDOWN_DEADLINE, futures::future::join_all(tasks))
        .await
        .is_err()
    {
        warn!("shutdown deadline exceeded, abandoning remaining tasks");
    }

    info!("collector stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
