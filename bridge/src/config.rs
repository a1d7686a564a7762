//! Configuration for the SILTA bridge
//!
//! Defaults match the values the bridge has always shipped with, so an
//! empty config file yields a working local setup.

use crate::discovery::ServiceStatus;
use serde::Deserialize;
use std::time::Duration;

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Configuration for the gRPC transport adapter
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    // Server
    /// Address the server binds to, e.g. `"localhost:50051"`
    pub server_address: String,
    /// Maximum concurrent calls per connection
    pub max_concurrent_calls: u32,
    /// Default timeout applied to inbound handler execution
    pub default_timeout: Duration,
    /// Maximum receive message size in bytes
    pub max_recv_msg_size: usize,
    /// Maximum send message size in bytes
    pub max_send_msg_size: usize,
    /// Interval for HTTP/2 keepalive pings
    pub keepalive_interval: Duration,
    /// Timeout for HTTP/2 keepalive pings
    pub keepalive_timeout: Duration,

    // Client
    /// Connections dialed per target pool
    pub pool_size: usize,
    /// Timeout for establishing one connection
    pub dial_timeout: Duration,
    /// Client-side keepalive interval
    pub client_keepalive: Duration,
    /// Default timeout for outbound calls
    pub client_timeout: Duration,
    /// Whether callers should retry failed requests
    pub enable_retry: bool,
    /// Maximum retries for a single request
    pub max_retries: u32,
    /// Backoff interval between retries
    pub retry_backoff: Duration,
    /// Load balancing policy name, e.g. `"round_robin"`
    pub load_balancing_policy: String,

    // Security
    /// Enable transport-level encryption
    pub enable_tls: bool,
    /// Path to the PEM certificate file
    pub tls_cert_file: Option<String>,
    /// Path to the PEM private key file
    pub tls_key_file: Option<String>,
    /// Path to the CA certificate used for client verification.
    /// Client certificates are required only when this is set.
    pub tls_ca_file: Option<String>,
    /// Client authentication mode, e.g. `"require_and_verify"`
    pub client_auth_type: Option<String>,
    /// Enable per-request authentication
    pub enable_authentication: bool,

    // Monitoring
    /// Enable metrics collection
    pub enable_metrics: bool,
    /// Accept the reflection flag; the reflection service itself is
    /// registered by the embedding process alongside its descriptors
    pub enable_reflection: bool,
    /// Enable health checking of pooled connections
    pub enable_health_check: bool,
    /// Enable distributed tracing spans
    pub enable_tracing: bool,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            server_address: "localhost:50051".to_string(),
            max_concurrent_calls: 100,
            default_timeout: secs(30),
            max_recv_msg_size: 10 * 1024 * 1024,
            max_send_msg_size: 10 * 1024 * 1024,
            keepalive_interval: secs(60),
            keepalive_timeout: secs(20),

            pool_size: 10,
            dial_timeout: secs(10),
            client_keepalive: secs(60),
            client_timeout: secs(30),
            enable_retry: true,
            max_retries: 3,
            retry_backoff: secs(1),
            load_balancing_policy: "round_robin".to_string(),

            enable_tls: false,
            tls_cert_file: None,
            tls_key_file: None,
            tls_ca_file: None,
            client_auth_type: None,
            enable_authentication: false,

            enable_metrics: true,
            enable_reflection: true,
            enable_health_check: true,
            enable_tracing: true,
        }
    }
}

/// Storage backend for the discovery registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryBackend {
    /// In-process map, lost on restart
    Memory,
}

/// Configuration for the service discovery registry
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Interval between registry refresh sweeps
    pub refresh_interval: Duration,
    /// Interval between health-check rounds
    pub health_check_interval: Duration,
    /// Timeout for a single health probe
    pub health_check_timeout: Duration,
    /// Entries untouched for longer than this are evicted.
    /// Zero disables TTL eviction.
    pub service_ttl: Duration,
    /// Enable the watch/notify mechanism
    pub enable_watch: bool,
    /// Enable the background health-check loop
    pub enable_health_check: bool,
    /// Storage backend selector
    pub backend: DiscoveryBackend,
    /// Status assigned to newly registered services
    pub default_status: ServiceStatus,
    /// Capacity of each watcher's event queue
    pub watch_queue_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: secs(30),
            health_check_interval: secs(30),
            health_check_timeout: secs(5),
            service_ttl: Duration::ZERO,
            enable_watch: true,
            enable_health_check: true,
            backend: DiscoveryBackend::Memory,
            default_status: ServiceStatus::Running,
            watch_queue_capacity: 64,
        }
    }
}

/// Top-level bridge configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// gRPC transport adapter configuration
    pub grpc: GrpcConfig,
    /// Service discovery configuration
    pub discovery: DiscoveryConfig,
    /// Port for the metrics/health HTTP server
    pub metrics_port: u16,
}

impl BridgeConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
