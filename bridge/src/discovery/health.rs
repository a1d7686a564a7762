//! Pluggable health probes for registered services

use super::registry::{ServiceInfo, ServiceStatus};
use async_trait::async_trait;

/// Probes one service instance for liveness
///
/// The registry's health loop calls this under a bounded timeout for
/// every registered service. Implementations should make one cheap
/// request to the service's address and report the outcome.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Returns `true` when the service is healthy
    async fn check(&self, service: &ServiceInfo) -> bool;
}

/// Default checker that trusts the recorded status
///
/// Treats `running` services as healthy and everything else as
/// unhealthy. It makes no network calls, so it never flips a service on
/// its own; deployments wire a real probe per service type.
pub struct StatusHealthChecker;

#[async_trait]
impl HealthChecker for StatusHealthChecker {
    async fn check(&self, service: &ServiceInfo) -> bool {
        service.status == ServiceStatus::Running
    }
}
