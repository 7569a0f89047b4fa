//! avilb daemon entry point.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::signal;
use tokio::sync::mpsc;

use avilb::controller::HttpController;
use avilb::runtime::{ContainerRuntime, DockerRuntime};
use avilb::{AviLoadBalancer, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting avilb against {} (tenant {}, cloud {})",
        cfg.controller.url, cfg.controller.tenant, cfg.cloud_name
    );

    let client = HttpController::new(&cfg.controller)?;
    let poll_interval = Duration::from_secs(cfg.poll_interval_secs);
    let lb = Arc::new(AviLoadBalancer::new(cfg, client));

    // Snapshot channel
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(4);

    // Container Runtime (Docker)
    let runtime = DockerRuntime::new(poll_interval);
    let runtime_handle = tokio::spawn(async move {
        if let Err(e) = runtime.monitor(snapshot_tx).await {
            error!("Container runtime failed: {}", e);
        }
    });

    // Reconciliation passes
    let lb_for_passes = Arc::clone(&lb);
    let pass_handle = tokio::spawn(async move {
        while let Some(snapshot) = snapshot_rx.recv().await {
            if let Err(e) = lb_for_passes.generate_config(snapshot).await {
                error!("{} pass failed: {}", lb_for_passes.name(), e);
            }
        }
        info!("Snapshot channel closed");
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    runtime_handle.abort();
    pass_handle.abort();

    info!("Waiting for queued load balancer work...");
    lb.drain().await;

    info!("Shutdown complete.");
    Ok(())
}
