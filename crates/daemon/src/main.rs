// dashsyncd: daemon entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use dashsync_daemon::config::Config;
use dashsync_daemon::metrics::SidecarMetrics;
use dashsync_daemon::runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    config.validate()?;

    info!(
        manifest_dir = %config.manifest_dir.display(),
        working_dir = %config.working_dir.display(),
        "starting dashboard sync daemon"
    );

    let metrics = Arc::new(SidecarMetrics::default());
    let (shutdown_tx, _) = broadcast::channel(4);

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = ctrl_c_tx.send(());
    });

    let metrics_task = tokio::spawn(dashsync_daemon::metrics::serve(
        config.metrics_addr,
        metrics.clone(),
        shutdown_tx.subscribe(),
    ));

    let result = runtime::run(&config, metrics, shutdown_tx.subscribe())
        .await
        .context("watch runtime terminated unexpectedly");

    // Bring the metrics endpoint down with the runtime.
    let _ = shutdown_tx.send(());
    match metrics_task.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(%error, "metrics server exited with error"),
        Err(error) => warn!(%error, "metrics task did not shut down cleanly"),
    }

    result
}
