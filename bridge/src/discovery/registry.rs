//! In-memory service registry with watch and health tracking

use super::health::HealthChecker;
use crate::config::DiscoveryConfig;
use crate::error::RegistryError;
use crate::metrics::Metrics;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle status of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Draining,
    Maintenance,
}

impl ServiceStatus {
    /// Lowercase wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Draining => "draining",
            ServiceStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered service instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Stable identifier; the registry's sole key
    pub id: String,
    /// Human-readable service name
    pub name: String,
    /// Protocol or adapter kind, e.g. `"grpc"`
    #[serde(default)]
    pub service_type: String,
    /// Deployed version string
    #[serde(default)]
    pub version: String,
    /// Reachable host
    pub address: String,
    /// Reachable port
    pub port: u16,
    /// Free-form labels
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Current lifecycle status
    #[serde(default = "default_status")]
    pub status: ServiceStatus,
    /// Epoch millis of the last registry mutation touching this entry
    #[serde(default)]
    pub last_updated_ms: i64,
}

fn default_status() -> ServiceStatus {
    ServiceStatus::Unknown
}

/// Kind of a service change event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Updated,
    Removed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Updated => "updated",
            EventKind::Removed => "removed",
        }
    }
}

/// A service change, delivered once per watcher, best-effort
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: EventKind,
    /// Snapshot of the service at the time of the change
    pub service: ServiceInfo,
    pub timestamp_ms: i64,
}

/// Criteria for service lookup and watching
///
/// Empty fields are wildcards. Metadata matches as a super-set: every
/// filter key must be present with an equal value in the candidate.
#[derive(Debug, Clone, Default)]
pub struct ServiceFilter {
    pub name: Option<String>,
    pub service_type: Option<String>,
    pub version: Option<String>,
    pub address: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ServiceFilter {
    /// Whether a service satisfies every set criterion
    pub fn matches(&self, service: &ServiceInfo) -> bool {
        if let Some(name) = &self.name {
            if &service.name != name {
                return false;
            }
        }
        if let Some(service_type) = &self.service_type {
            if &service.service_type != service_type {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if &service.version != version {
                return false;
            }
        }
        if let Some(address) = &self.address {
            if &service.address != address {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(k, v)| service.metadata.get(k) == Some(v))
    }
}

/// Handle identifying one registered watcher
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatcherId(String);

impl std::fmt::Display for WatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct Watcher {
    filter: ServiceFilter,
    tx: mpsc::Sender<ServiceEvent>,
}

/// In-memory service directory
///
/// Registrations, lookups, and watches are safe to call from any task.
/// The background health/TTL loop is started with [`start`](Self::start)
/// and joined by [`stop`](Self::stop).
pub struct ServiceRegistry {
    config: DiscoveryConfig,
    services: RwLock<HashMap<String, ServiceInfo>>,
    watchers: RwLock<HashMap<WatcherId, Watcher>>,
    background: Mutex<Option<BackgroundLoop>>,
}

struct BackgroundLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ServiceRegistry {
    /// Create a registry with the given configuration
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            services: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
            background: Mutex::new(None),
        }
    }

    /// Register a service, or replace it if the id already exists
    ///
    /// New registrations with status `unknown` receive the configured
    /// default status. Fires `added` for new entries, `updated` for
    /// replacements.
    pub fn register(&self, mut info: ServiceInfo) -> Result<(), RegistryError> {
        if info.id.is_empty() {
            return Err(RegistryError::InvalidArgument("service id is required".into()));
        }
        if info.name.is_empty() {
            return Err(RegistryError::InvalidArgument("service name is required".into()));
        }
        if info.address.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "service address is required".into(),
            ));
        }
        if info.port == 0 {
            return Err(RegistryError::InvalidArgument(
                "service port must be non-zero".into(),
            ));
        }

        info.last_updated_ms = silta_core::epoch_millis();

        let (kind, count) = {
            let mut services = self.services.write();
            let kind = if services.contains_key(&info.id) {
                EventKind::Updated
            } else {
                if info.status == ServiceStatus::Unknown {
                    info.status = self.config.default_status;
                }
                EventKind::Added
            };
            services.insert(info.id.clone(), info.clone());
            (kind, services.len())
        };

        info!(
            service_id = %info.id,
            name = %info.name,
            address = %info.address,
            port = info.port,
            event = kind.as_str(),
            "Service registered"
        );
        if let Some(metrics) = Metrics::get() {
            metrics.set_services_registered(count);
        }
        self.emit(kind, info);
        Ok(())
    }

    /// Remove a service, firing a `removed` event
    pub fn deregister(&self, id: &str) -> Result<(), RegistryError> {
        let (removed, count) = {
            let mut services = self.services.write();
            let removed = services.remove(id);
            (removed, services.len())
        };
        let Some(info) = removed else {
            return Err(RegistryError::NotFound);
        };

        info!(service_id = %id, name = %info.name, "Service deregistered");
        if let Some(metrics) = Metrics::get() {
            metrics.set_services_registered(count);
        }
        self.emit(EventKind::Removed, info);
        Ok(())
    }

    /// Look up one service by id
    pub fn get(&self, id: &str) -> Result<ServiceInfo, RegistryError> {
        self.services
            .read()
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound)
    }

    /// Find all services satisfying a filter
    ///
    /// Copies a snapshot under the read lock; matching runs unlocked so
    /// a slow filter cannot stall registrations.
    pub fn find(&self, filter: &ServiceFilter) -> Vec<ServiceInfo> {
        let snapshot: Vec<ServiceInfo> = self.services.read().values().cloned().collect();
        snapshot.into_iter().filter(|s| filter.matches(s)).collect()
    }

    /// Update one service's status, firing an `updated` event on change
    pub fn update_status(&self, id: &str, status: ServiceStatus) -> Result<(), RegistryError> {
        let updated = {
            let mut services = self.services.write();
            let info = services.get_mut(id).ok_or(RegistryError::NotFound)?;
            if info.status == status {
                return Ok(());
            }
            info.status = status;
            info.last_updated_ms = silta_core::epoch_millis();
            info.clone()
        };
        self.emit(EventKind::Updated, updated);
        Ok(())
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Register a watcher and replay `added` events for current matches
    ///
    /// Replay is best-effort: a full queue drops the replay event rather
    /// than blocking registration. The watcher is pruned automatically
    /// once the receiver is dropped.
    pub fn watch(
        &self,
        filter: ServiceFilter,
    ) -> Result<(WatcherId, mpsc::Receiver<ServiceEvent>), RegistryError> {
        if !self.config.enable_watch {
            return Err(RegistryError::NotInitialized);
        }

        let id = WatcherId(ulid::Ulid::new().to_string());
        let (tx, rx) = mpsc::channel(self.config.watch_queue_capacity);

        // The watcher map stays locked from snapshot to insert, and
        // events are emitted only after the service map is unlocked, so
        // a concurrent registration lands in the replay or as a live
        // event. Delivery is at-least-once across that boundary.
        let mut watchers = self.watchers.write();
        let matching = self.find(&filter);
        for service in matching {
            let event = ServiceEvent {
                kind: EventKind::Added,
                service,
                timestamp_ms: silta_core::epoch_millis(),
            };
            if tx.try_send(event).is_err() {
                warn!(watcher_id = %id, "Watcher queue full during replay, dropping event");
                if let Some(metrics) = Metrics::get() {
                    metrics.record_dropped("replay_queue_full");
                }
            }
        }

        watchers.insert(id.clone(), Watcher { filter, tx });
        drop(watchers);
        debug!(watcher_id = %id, "Watcher registered");
        Ok((id, rx))
    }

    /// Remove a watcher explicitly
    pub fn unwatch(&self, id: &WatcherId) {
        if self.watchers.write().remove(id).is_some() {
            debug!(watcher_id = %id, "Watcher removed");
        }
    }

    /// Number of active watchers
    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }

    /// Deliver an event to every watcher whose filter matches
    ///
    /// Never blocks: a full queue drops the event for that watcher only.
    /// Watchers whose receiver is gone are pruned.
    fn emit(&self, kind: EventKind, service: ServiceInfo) {
        if !self.config.enable_watch {
            return;
        }
        if let Some(metrics) = Metrics::get() {
            metrics.record_service_event(kind.as_str());
        }

        let event = ServiceEvent {
            kind,
            service,
            timestamp_ms: silta_core::epoch_millis(),
        };

        let mut closed = Vec::new();
        {
            let watchers = self.watchers.read();
            for (id, watcher) in watchers.iter() {
                if !watcher.filter.matches(&event.service) {
                    continue;
                }
                match watcher.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(watcher_id = %id, event = kind.as_str(), "Watcher queue full, dropping event");
                        if let Some(metrics) = Metrics::get() {
                            metrics.record_dropped("queue_full");
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(id.clone());
                    }
                }
            }
        }
        if !closed.is_empty() {
            let mut watchers = self.watchers.write();
            for id in closed {
                watchers.remove(&id);
                debug!(watcher_id = %id, "Watcher receiver gone, pruned");
            }
        }
    }

    /// Start the background health-check and TTL-eviction loop
    ///
    /// No-op if health checks are disabled or the loop already runs.
    pub fn start(self: &Arc<Self>, checker: Arc<dyn HealthChecker>) {
        if !self.config.enable_health_check {
            return;
        }
        let mut background = self.background.lock();
        if background.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut health_tick = tokio::time::interval(registry.config.health_check_interval);
            health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The refresh sweep handles TTL eviction on its own cadence
            let mut refresh_tick = tokio::time::interval(registry.config.refresh_interval);
            refresh_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = health_tick.tick() => {
                        registry.run_health_checks(checker.as_ref()).await;
                    }
                    _ = refresh_tick.tick() => {
                        registry.evict_expired();
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Health-check loop stopping");
                        break;
                    }
                }
            }
        });

        *background = Some(BackgroundLoop {
            shutdown: shutdown_tx,
            handle,
        });
        info!(
            interval_secs = self.config.health_check_interval.as_secs(),
            "Health-check loop started"
        );
    }

    /// Stop the background loop and wait for it to finish
    pub async fn stop(&self) {
        let background = self.background.lock().take();
        if let Some(background) = background {
            let _ = background.shutdown.send(true);
            let _ = background.handle.await;
        }
    }

    /// Probe every registered service once and apply status flips
    ///
    /// Healthy while not `running` flips to `running`; unhealthy while
    /// `running` flips to `failed`. Each flip fires one `updated` event.
    pub async fn run_health_checks(&self, checker: &dyn HealthChecker) {
        let snapshot: Vec<ServiceInfo> = self.services.read().values().cloned().collect();
        for service in snapshot {
            let probe = tokio::time::timeout(
                self.config.health_check_timeout,
                checker.check(&service),
            )
            .await;

            let (healthy, result) = match probe {
                Ok(true) => (true, "healthy"),
                Ok(false) => (false, "unhealthy"),
                Err(_) => {
                    warn!(service_id = %service.id, "Health probe timed out");
                    (false, "error")
                }
            };
            if let Some(metrics) = Metrics::get() {
                metrics.record_health_check(result);
            }

            let next = match (healthy, service.status) {
                (true, status) if status != ServiceStatus::Running => ServiceStatus::Running,
                (false, ServiceStatus::Running) => ServiceStatus::Failed,
                _ => continue,
            };
            info!(
                service_id = %service.id,
                from = %service.status,
                to = %next,
                "Health check changed service status"
            );
            // The entry may have been deregistered since the snapshot
            let _ = self.update_status(&service.id, next);
        }
    }

    /// Remove entries untouched for longer than the configured TTL
    fn evict_expired(&self) {
        if self.config.service_ttl == Duration::ZERO {
            return;
        }
        let ttl_ms = self.config.service_ttl.as_millis() as i64;
        let now = silta_core::epoch_millis();

        let expired: Vec<String> = self
            .services
            .read()
            .values()
            .filter(|s| now - s.last_updated_ms > ttl_ms)
            .map(|s| s.id.clone())
            .collect();

        for id in expired {
            warn!(service_id = %id, "Service TTL expired, evicting");
            let _ = self.deregister(&id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_registry() -> ServiceRegistry {
        ServiceRegistry::new(DiscoveryConfig::default())
    }

    fn echo_service(id: &str) -> ServiceInfo {
        ServiceInfo {
            id: id.to_string(),
            name: "echo".to_string(),
            service_type: "grpc".to_string(),
            version: "1.0.0".to_string(),
            address: "127.0.0.1".to_string(),
            port: 9000,
            metadata: HashMap::new(),
            status: ServiceStatus::Unknown,
            last_updated_ms: 0,
        }
    }

    #[test]
    fn test_register_defaults_status_and_stamps() {
        let registry = test_registry();
        registry.register(echo_service("svc-1")).unwrap();

        let info = registry.get("svc-1").unwrap();
        assert_eq!(info.status, ServiceStatus::Running);
        assert!(info.last_updated_ms > 0);
    }

    #[test]
    fn test_register_validation() {
        let registry = test_registry();

        let mut no_id = echo_service("");
        no_id.id = String::new();
        assert!(matches!(
            registry.register(no_id),
            Err(RegistryError::InvalidArgument(_))
        ));

        let mut no_port = echo_service("svc-1");
        no_port.port = 0;
        assert!(matches!(
            registry.register(no_port),
            Err(RegistryError::InvalidArgument(_))
        ));

        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_reregister_same_id_updates_in_place() {
        let registry = test_registry();
        let (_, mut rx) = registry.watch(ServiceFilter::default()).unwrap();

        registry.register(echo_service("svc-1")).unwrap();
        let mut second = echo_service("svc-1");
        second.version = "2.0.0".to_string();
        registry.register(second).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("svc-1").unwrap().version, "2.0.0");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Added);
        let next = rx.recv().await.unwrap();
        assert_eq!(next.kind, EventKind::Updated);
    }

    #[test]
    fn test_deregister_not_found() {
        let registry = test_registry();
        assert!(matches!(
            registry.deregister("missing"),
            Err(RegistryError::NotFound)
        ));
    }

    #[test]
    fn test_find_with_metadata_filter() {
        let registry = test_registry();

        let mut prod = echo_service("svc-prod");
        prod.metadata.insert("env".to_string(), "prod".to_string());
        registry.register(prod).unwrap();

        let mut staging = echo_service("svc-staging");
        staging.metadata.insert("env".to_string(), "staging".to_string());
        registry.register(staging).unwrap();

        // No metadata at all: excluded too
        registry.register(echo_service("svc-bare")).unwrap();

        let filter = ServiceFilter {
            metadata: HashMap::from([("env".to_string(), "prod".to_string())]),
            ..Default::default()
        };
        let found = registry.find(&filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "svc-prod");
    }

    #[test]
    fn test_find_empty_filter_is_wildcard() {
        let registry = test_registry();
        registry.register(echo_service("svc-1")).unwrap();
        registry.register(echo_service("svc-2")).unwrap();

        assert_eq!(registry.find(&ServiceFilter::default()).len(), 2);
    }

    #[tokio::test]
    async fn test_watch_replays_existing_matches() {
        let registry = test_registry();
        registry.register(echo_service("svc-1")).unwrap();

        let filter = ServiceFilter {
            name: Some("echo".to_string()),
            ..Default::default()
        };
        let (_, mut rx) = registry.watch(filter).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Added);
        assert_eq!(event.service.id, "svc-1");
    }

    #[tokio::test]
    async fn test_watch_no_match_no_replay_then_live_event() {
        let registry = test_registry();
        registry.register(echo_service("svc-1")).unwrap();

        let filter = ServiceFilter {
            name: Some("billing".to_string()),
            ..Default::default()
        };
        let (_, mut rx) = registry.watch(filter).unwrap();
        assert!(rx.try_recv().is_err());

        let mut billing = echo_service("svc-2");
        billing.name = "billing".to_string();
        registry.register(billing).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Added);
        assert_eq!(event.service.name, "billing");
    }

    #[tokio::test]
    async fn test_full_watcher_queue_drops_without_blocking() {
        let mut config = DiscoveryConfig::default();
        config.watch_queue_capacity = 1;
        let registry = ServiceRegistry::new(config);

        let (_, mut rx) = registry.watch(ServiceFilter::default()).unwrap();
        registry.register(echo_service("svc-1")).unwrap();
        // Queue is full now; this event is dropped for the watcher
        registry.register(echo_service("svc-2")).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.service.id, "svc-1");
        assert!(rx.try_recv().is_err());
        // Registry state is unaffected by the slow watcher
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_prunes_watcher() {
        let registry = test_registry();
        let (_, rx) = registry.watch(ServiceFilter::default()).unwrap();
        assert_eq!(registry.watcher_count(), 1);

        drop(rx);
        registry.register(echo_service("svc-1")).unwrap();
        assert_eq!(registry.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_unwatch_removes_watcher() {
        let registry = test_registry();
        let (id, _rx) = registry.watch(ServiceFilter::default()).unwrap();
        registry.unwatch(&id);
        assert_eq!(registry.watcher_count(), 0);
    }

    #[test]
    fn test_watch_disabled() {
        let mut config = DiscoveryConfig::default();
        config.enable_watch = false;
        let registry = ServiceRegistry::new(config);

        assert!(matches!(
            registry.watch(ServiceFilter::default()),
            Err(RegistryError::NotInitialized)
        ));
    }

    struct FlippingChecker {
        healthy: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl HealthChecker for FlippingChecker {
        async fn check(&self, _service: &ServiceInfo) -> bool {
            self.healthy.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_health_flip_running_failed_running() {
        let registry = test_registry();
        registry.register(echo_service("svc-1")).unwrap();
        let (_, mut rx) = registry.watch(ServiceFilter::default()).unwrap();
        // Drain the replay event
        rx.recv().await.unwrap();

        let checker = FlippingChecker {
            healthy: std::sync::atomic::AtomicBool::new(false),
        };

        registry.run_health_checks(&checker).await;
        assert_eq!(registry.get("svc-1").unwrap().status, ServiceStatus::Failed);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Updated);
        assert_eq!(event.service.status, ServiceStatus::Failed);

        // Already failed: a second unhealthy round emits nothing
        registry.run_health_checks(&checker).await;
        assert!(rx.try_recv().is_err());

        checker.healthy.store(true, std::sync::atomic::Ordering::SeqCst);
        registry.run_health_checks(&checker).await;
        assert_eq!(registry.get("svc-1").unwrap().status, ServiceStatus::Running);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Updated);
        assert_eq!(event.service.status, ServiceStatus::Running);
    }

    #[tokio::test]
    async fn test_ttl_eviction() {
        let mut config = DiscoveryConfig::default();
        config.service_ttl = Duration::from_millis(1);
        let registry = ServiceRegistry::new(config);

        registry.register(echo_service("svc-1")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.evict_expired();

        assert!(matches!(registry.get("svc-1"), Err(RegistryError::NotFound)));
    }

    #[tokio::test]
    async fn test_end_to_end_register_find_deregister() {
        let registry = test_registry();
        registry.register(echo_service("svc-1")).unwrap();

        let filter = ServiceFilter {
            name: Some("echo".to_string()),
            ..Default::default()
        };
        let found = registry.find(&filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].status, ServiceStatus::Running);

        registry.deregister("svc-1").unwrap();
        assert!(registry.find(&filter).is_empty());
        assert!(matches!(registry.get("svc-1"), Err(RegistryError::NotFound)));
    }

    #[tokio::test]
    async fn test_background_loop_start_stop() {
        let mut config = DiscoveryConfig::default();
        config.health_check_interval = Duration::from_millis(10);
        let registry = Arc::new(ServiceRegistry::new(config));
        registry.register(echo_service("svc-1")).unwrap();

        registry.start(Arc::new(super::super::StatusHealthChecker));
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.stop().await;

        // Default checker keeps running services running
        assert_eq!(registry.get("svc-1").unwrap().status, ServiceStatus::Running);
    }
}
