//! PulseWatch - Network Monitoring Application

use pulsewatch::config::ServerConfig;
use pulsewatch::monitor::Monitor;
use pulsewatch::registry::TargetStore;
use pulsewatch::scheduler::SchedulerError;
use pulsewatch::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pulsewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting PulseWatch on port {}...", cfg.http_port);
    tracing::info!("Using target list at {}", cfg.targets_path.display());

    // Load targets
    let store = TargetStore::new(&cfg.targets_path);
    let targets = store.load()?;
    if targets.is_empty() {
        tracing::info!("No targets configured yet; add some with PUT /api/targets");
    }

    // Create and start the monitor
    let monitor = Arc::new(Monitor::new(cfg.monitor_config(), targets)?);
    tracing::info!("ICMP support: {:?}", monitor.capabilities().icmp);

    let mut results = monitor.subscribe();
    tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            tracing::debug!(
                "{} {} ok={} latency={:.1}ms",
                result.target_id,
                result.endpoint,
                result.ok,
                result.latency_ms
            );
        }
    });

    monitor.start().await?;

    // Serve until interrupted or until probing fails for good
    let server = Server::new(cfg.http_port, monitor.clone(), store);
    let outcome = tokio::select! {
        served = server.start(shutdown_signal()) => served,
        reason = monitor.wait_failed() => Err(SchedulerError::Fatal(reason).into()),
    };

    monitor.shutdown().await;
    tracing::info!("PulseWatch stopped");

    outcome
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
