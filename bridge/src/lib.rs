//! SILTA - Multi-Protocol Bridge Runtime
//!
//! A process that lets independently-deployed services register
//! themselves, be discovered, and exchange RPCs through pooled,
//! instrumented transport connections.
//!
//! # Architecture
//!
//! ```text
//! Services ──► ServiceRegistry ──► health loop + watch events
//!
//! Callers ──► GrpcAdapter ──► ConnectionPool (per target) ──► peers
//!
//! Peers ──► gRPC server ──► interceptor chain ──► BridgeServer
//! ```
//!
//! The registry tells adapters where to connect; the adapter's pools
//! carry the traffic and feed the metrics the registry's operators
//! watch.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod grpc;
pub mod interceptor;
pub mod metrics;
pub mod metrics_server;
pub mod pool;
pub mod server;

// Proto types generated from silta/v1/bridge.proto
pub mod proto {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]
    #![allow(clippy::derive_partial_eq_without_eq)]

    include!("proto/silta.v1.rs");

    pub use bridge_service_client::BridgeServiceClient;
    pub use bridge_service_server::{BridgeService, BridgeServiceServer};
}

pub use config::{BridgeConfig, DiscoveryConfig, GrpcConfig};
pub use discovery::{
    EventKind, HealthChecker, ServiceEvent, ServiceFilter, ServiceInfo, ServiceRegistry,
    ServiceStatus, StatusHealthChecker, WatcherId,
};
pub use error::{BridgeError, ErrorDetail, ErrorKind, RegistryError, Result};
pub use grpc::GrpcAdapter;
pub use metrics_server::MetricsServer;
pub use pool::{ConnectionPool, Dialer, GrpcDialer};
pub use server::{BridgeServer, EchoHandler, MessageHandler};
