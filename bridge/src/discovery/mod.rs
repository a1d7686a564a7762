//! Service discovery for the SILTA bridge
//!
//! An in-memory directory of service instances. Services register
//! themselves, callers look them up by filter, and watchers receive
//! change events as services come and go.
//!
//! # Architecture
//!
//! ```text
//! Service ──► register() ──► registry inserts, fires `added`
//!
//! Caller ──► find(filter) ──► snapshot scan, no lock held during match
//!
//! Watcher ──► watch(filter) ──► bounded event queue (full queue drops)
//!
//! Health loop ──► checker.check(svc) ──► running ⇄ failed, fires `updated`
//! ```
//!
//! Registry state lives in process memory only. A restart loses it and
//! services are expected to re-register.

mod health;
mod registry;

pub use health::{HealthChecker, StatusHealthChecker};
pub use registry::{
    EventKind, ServiceEvent, ServiceFilter, ServiceInfo, ServiceRegistry, ServiceStatus, WatcherId,
};
