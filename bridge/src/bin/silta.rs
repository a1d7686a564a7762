//! SILTA bridge entry point
//!
//! Starts the gRPC server with the echo handler, the discovery registry
//! with its health loop, and the metrics HTTP server. Configuration is
//! read from the JSON file named by `SILTA_CONFIG` (or the first
//! argument); absent that, defaults apply.

use silta_bridge::{
    BridgeConfig, BridgeServer, EchoHandler, GrpcAdapter, MetricsServer, ServiceRegistry,
    StatusHealthChecker,
};
use silta_core::Adapter;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = load_config().await?;
    silta_bridge::metrics::Metrics::init()?;

    // Discovery registry + health loop
    let registry = Arc::new(ServiceRegistry::new(config.discovery.clone()));
    registry.start(Arc::new(StatusHealthChecker));

    // Metrics/health HTTP endpoint
    let metrics_port = if config.metrics_port == 0 {
        9090
    } else {
        config.metrics_port
    };
    let metrics_handle = MetricsServer::start(metrics_port, Some(Arc::clone(&registry)));

    // gRPC transport adapter
    let adapter = Arc::new(GrpcAdapter::new("silta-grpc", config.grpc.clone()));
    adapter.initialize().await?;

    let server = BridgeServer::new(Arc::new(EchoHandler), config.grpc.default_timeout)
        .with_inbound(adapter.inbound_sender());

    {
        let adapter = Arc::clone(&adapter);
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            shutdown_signal().await;
            registry.stop().await;
            if let Err(e) = adapter.shutdown().await {
                error!(error = %e, "Adapter shutdown error");
            }
        });
    }

    adapter.serve(server).await?;

    metrics_handle.abort();
    info!("SILTA shutdown complete");
    Ok(())
}

async fn load_config() -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let path = std::env::var("SILTA_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1));
    match path {
        Some(path) => {
            info!(path = %path, "Loading configuration");
            let raw = tokio::fs::read_to_string(&path).await?;
            Ok(BridgeConfig::from_json(&raw)?)
        }
        None => {
            info!("No configuration file, using defaults");
            Ok(BridgeConfig::default())
        }
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
