//! Adapter contract for SILTA transport bindings
//!
//! Every transport binding (gRPC, queue, HTTP, ...) implements the
//! [`Adapter`] trait: four lifecycle calls, message I/O, and observable
//! status + statistics. The bookkeeping all bindings share (the state
//! machine, the counters, the latency average) lives in
//! [`AdapterRuntime`] so individual bindings only implement transport
//! semantics.
//!
//! # Lifecycle
//!
//! ```text
//! Initializing ──► Connecting ──► Connected ──► Disconnected
//!       │               │             │               │
//!       └───────────────┴─── Error ◄──┴───────────────┘
//!                              │
//!                          Stopped (explicit shutdown only)
//! ```

use crate::error::AdapterError;
use crate::message::{epoch_millis, Message};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// Weight of the previous average in the latency EWMA. A new sample
/// contributes `1.0 - EWMA_WEIGHT` (10%), smoothing transient spikes
/// while staying responsive. Part of the observable contract: dashboards
/// compare this value across bridge deployments.
const EWMA_WEIGHT: f64 = 0.9;

/// Lifecycle states of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// Constructed, not yet initialized
    Initializing,
    /// Establishing transport connectivity
    Connecting,
    /// Ready for message I/O
    Connected,
    /// Cleanly disconnected, may reconnect
    Disconnected,
    /// A failure occurred; `last_error` carries the cause
    Error,
    /// Terminal state, reached only via explicit shutdown
    Stopped,
}

/// Observable status of an adapter
#[derive(Debug, Clone)]
pub struct AdapterStatus {
    /// Current lifecycle state
    pub state: AdapterState,
    /// Most recent failure, if any
    pub last_error: Option<String>,
    /// When the current state was entered, epoch millis
    pub since_ms: i64,
}

/// Counters and latency statistics for an adapter
#[derive(Debug, Clone, Default)]
pub struct AdapterStats {
    /// Messages successfully sent
    pub messages_sent: u64,
    /// Messages successfully received
    pub messages_received: u64,
    /// Failed operations
    pub errors: u64,
    /// When the adapter last entered `Connected`, epoch millis.
    /// Updated only on a Connecting → Connected transition.
    pub connected_since_ms: Option<i64>,
    /// Last send/receive activity, epoch millis
    pub last_activity_ms: Option<i64>,
    /// Exponentially weighted moving average of operation latency
    pub avg_latency_ms: f64,
}

/// Retry policy carried by adapter configuration
///
/// The bridge itself never retries a failed call; this value is handed
/// to callers (or a higher-level policy) that choose to.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retry attempts for a single operation
    pub max_retries: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on backoff growth
    pub max_backoff: Duration,
    /// Backoff multiplier per attempt
    pub multiplier: f64,
    /// Jitter factor in `[0, 1]` applied to each interval
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            randomization_factor: 0.2,
        }
    }
}

/// Rate ceiling carried by adapter configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RateLimit {
    /// Sustained requests per second
    pub requests_per_second: u32,
    /// Burst allowance above the sustained rate
    pub burst: u32,
    /// Accounting window
    pub window: Duration,
}

/// Immutable configuration for an adapter instance
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AdapterConfig {
    /// Adapter instance name, unique within a registry
    pub name: String,
    /// Transport kind, e.g. `"grpc"`
    pub kind: String,
    /// Target endpoint the adapter binds or dials
    pub endpoint: String,
    /// Opaque credential reference (never logged)
    #[serde(default)]
    pub credentials: Option<String>,
    /// Retry policy for callers
    #[serde(default)]
    pub retry: RetryConfig,
    /// Optional rate ceiling
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    /// Default operation timeout
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Contract every transport binding satisfies
///
/// Lifecycle calls are idempotent with respect to status reporting:
/// calling `connect` on an already-connected adapter must not corrupt
/// statistics. `send`/`receive` refresh activity counters; any failure
/// records the error and forces the `Error` state.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Adapter instance name
    fn name(&self) -> &str;

    /// Transport kind, e.g. `"grpc"`
    fn kind(&self) -> &str;

    /// Prepare resources; transitions Initializing → Connecting
    async fn initialize(&self) -> Result<(), AdapterError>;

    /// Establish connectivity; transitions Connecting → Connected
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Tear down connectivity; transitions to Disconnected
    async fn disconnect(&self) -> Result<(), AdapterError>;

    /// Terminal teardown; transitions to Stopped
    async fn shutdown(&self) -> Result<(), AdapterError>;

    /// Current lifecycle status
    fn status(&self) -> AdapterStatus;

    /// Current statistics snapshot
    fn stats(&self) -> AdapterStats;

    /// Send one message through the transport
    async fn send(&self, msg: Message) -> Result<(), AdapterError>;

    /// Receive the next message, `None` when the transport is drained
    async fn receive(&self) -> Result<Option<Message>, AdapterError>;
}

struct RuntimeInner {
    status: AdapterStatus,
    stats: AdapterStats,
}

/// Shared state machine + statistics recorder for adapter implementations
///
/// Bindings embed one `AdapterRuntime` and report transitions and
/// operations through it; status and stats are mutated only here, under
/// the runtime's own lock.
pub struct AdapterRuntime {
    inner: Mutex<RuntimeInner>,
}

impl AdapterRuntime {
    /// Create a runtime in the `Initializing` state
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RuntimeInner {
                status: AdapterStatus {
                    state: AdapterState::Initializing,
                    last_error: None,
                    since_ms: epoch_millis(),
                },
                stats: AdapterStats::default(),
            }),
        }
    }

    /// Transition to a new lifecycle state
    ///
    /// Re-entering the current state is a no-op, which makes the
    /// lifecycle calls idempotent for status reporting.
    /// `connected_since` is stamped only on Connecting → Connected.
    pub fn transition(&self, next: AdapterState) {
        let mut inner = self.inner.lock();
        if inner.status.state == next {
            return;
        }
        if inner.status.state == AdapterState::Connecting && next == AdapterState::Connected {
            inner.stats.connected_since_ms = Some(epoch_millis());
        }
        inner.status.state = next;
        inner.status.since_ms = epoch_millis();
        if next != AdapterState::Error {
            inner.status.last_error = None;
        }
    }

    /// Record a failure: sets `last_error`, bumps the error counter and
    /// forces the `Error` state
    pub fn record_error(&self, err: &AdapterError) {
        let mut inner = self.inner.lock();
        inner.stats.errors += 1;
        inner.status.last_error = Some(err.to_string());
        if inner.status.state != AdapterState::Error {
            inner.status.state = AdapterState::Error;
            inner.status.since_ms = epoch_millis();
        }
    }

    /// Record a successful send
    pub fn record_send(&self) {
        let mut inner = self.inner.lock();
        inner.stats.messages_sent += 1;
        inner.stats.last_activity_ms = Some(epoch_millis());
    }

    /// Record a successful receive
    pub fn record_receive(&self) {
        let mut inner = self.inner.lock();
        inner.stats.messages_received += 1;
        inner.stats.last_activity_ms = Some(epoch_millis());
    }

    /// Fold an operation latency sample into the moving average
    ///
    /// The first sample seeds the average; later samples contribute 10%.
    pub fn record_latency(&self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        let mut inner = self.inner.lock();
        let stats = &mut inner.stats;
        if stats.avg_latency_ms == 0.0 {
            stats.avg_latency_ms = sample;
        } else {
            stats.avg_latency_ms = stats.avg_latency_ms * EWMA_WEIGHT + sample * (1.0 - EWMA_WEIGHT);
        }
    }

    /// Snapshot the current status
    pub fn status(&self) -> AdapterStatus {
        self.inner.lock().status.clone()
    }

    /// Snapshot the current statistics
    pub fn stats(&self) -> AdapterStats {
        self.inner.lock().stats.clone()
    }
}

impl Default for AdapterRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let rt = AdapterRuntime::new();
        assert_eq!(rt.status().state, AdapterState::Initializing);
        assert!(rt.stats().connected_since_ms.is_none());
    }

    #[test]
    fn test_connected_since_only_on_connecting_to_connected() {
        let rt = AdapterRuntime::new();
        rt.transition(AdapterState::Connecting);
        assert!(rt.stats().connected_since_ms.is_none());

        rt.transition(AdapterState::Connected);
        let first = rt.stats().connected_since_ms;
        assert!(first.is_some());

        // Re-entering Connected is idempotent: the stamp must not move
        rt.transition(AdapterState::Connected);
        assert_eq!(rt.stats().connected_since_ms, first);

        // Disconnected → Connected without Connecting keeps the old stamp
        rt.transition(AdapterState::Disconnected);
        rt.transition(AdapterState::Connected);
        assert_eq!(rt.stats().connected_since_ms, first);
    }

    #[test]
    fn test_error_forces_error_state() {
        let rt = AdapterRuntime::new();
        rt.transition(AdapterState::Connecting);
        rt.transition(AdapterState::Connected);

        rt.record_error(&AdapterError::Send("timeout".to_string()));
        let status = rt.status();
        assert_eq!(status.state, AdapterState::Error);
        assert_eq!(status.last_error.as_deref(), Some("send failed: timeout"));
        assert_eq!(rt.stats().errors, 1);
    }

    #[test]
    fn test_send_receive_counters() {
        let rt = AdapterRuntime::new();
        rt.record_send();
        rt.record_send();
        rt.record_receive();

        let stats = rt.stats();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_received, 1);
        assert!(stats.last_activity_ms.is_some());
    }

    #[test]
    fn test_latency_ewma_weighting() {
        let rt = AdapterRuntime::new();

        // First sample seeds the average
        rt.record_latency(Duration::from_millis(100));
        assert!((rt.stats().avg_latency_ms - 100.0).abs() < 1e-9);

        // Second sample: 100 * 0.9 + 200 * 0.1 = 110
        rt.record_latency(Duration::from_millis(200));
        assert!((rt.stats().avg_latency_ms - 110.0).abs() < 1e-9);

        // A transient spike moves the average by only 10%
        rt.record_latency(Duration::from_millis(1110));
        assert!((rt.stats().avg_latency_ms - 210.0).abs() < 1e-9);
    }

    #[test]
    fn test_recovery_clears_last_error() {
        let rt = AdapterRuntime::new();
        rt.record_error(&AdapterError::NotReady);
        assert!(rt.status().last_error.is_some());

        rt.transition(AdapterState::Connecting);
        assert!(rt.status().last_error.is_none());
    }
}
