//! HTTP server for Prometheus metrics and liveness probes
//!
//! Runs a lightweight HTTP server on a separate port, next to the gRPC
//! listener, for scraping and orchestration probes.
//!
//! # Endpoints
//!
//! - `GET /metrics` - Prometheus metrics
//! - `GET /health` - Liveness summary with registry counts
//!
//! # Example
//!
//! ```ignore
//! use silta_bridge::metrics_server::MetricsServer;
//!
//! let handle = MetricsServer::start(9090, Some(registry.clone()));
//! ```

use crate::discovery::ServiceRegistry;
use axum::extract::State;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared state for the metrics server
#[derive(Clone)]
struct AppState {
    registry: Option<Arc<ServiceRegistry>>,
}

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start the metrics server on the given port
    ///
    /// Returns a JoinHandle that can be used to abort the server.
    /// The server runs until aborted or the process exits.
    pub fn start(port: u16, registry: Option<Arc<ServiceRegistry>>) -> JoinHandle<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let state = AppState { registry };

        tokio::spawn(async move {
            let app = Router::new()
                .route("/metrics", get(metrics_handler))
                .route("/health", get(health_handler))
                .with_state(state);

            info!(port = port, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, port = port, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

/// Handler for /metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Liveness summary for orchestration probes
#[derive(serde::Serialize)]
struct HealthSummary {
    status: &'static str,
    services_registered: usize,
    watchers: usize,
}

/// Handler for /health endpoint — returns a JSON liveness summary
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let Some(registry) = &state.registry else {
        return (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response();
    };

    let summary = HealthSummary {
        status: "ok",
        services_registered: registry.len(),
        watchers: registry.watcher_count(),
    };
    (StatusCode::OK, Json(summary)).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::discovery::{ServiceInfo, ServiceStatus};

    #[tokio::test]
    async fn test_metrics_handler_returns_prometheus_format() {
        let _ = crate::metrics::Metrics::init();

        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn test_health_handler_without_registry() {
        let state = AppState { registry: None };

        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_handler_reports_registry_counts() {
        let registry = Arc::new(ServiceRegistry::new(DiscoveryConfig::default()));
        registry
            .register(ServiceInfo {
                id: "svc-1".to_string(),
                name: "echo".to_string(),
                service_type: "grpc".to_string(),
                version: "1.0.0".to_string(),
                address: "127.0.0.1".to_string(),
                port: 9000,
                metadata: Default::default(),
                status: ServiceStatus::Unknown,
                last_updated_ms: 0,
            })
            .unwrap();

        let state = AppState {
            registry: Some(registry),
        };
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 10_000)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["services_registered"], 1);
        assert_eq!(json["watchers"], 0);
    }
}
