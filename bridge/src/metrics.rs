//! Prometheus metrics for the SILTA bridge

use crate::error::{BridgeError, ErrorKind, Result};
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder, register_counter_vec, register_gauge,
    register_histogram_vec,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All SILTA bridge metrics
pub struct Metrics {
    // ─────────────────────────────────────────────────────────────────────────
    // RPC counters
    // ─────────────────────────────────────────────────────────────────────────
    /// Requests handled or issued (by method)
    pub requests_total: CounterVec,

    /// Failed requests (by method, canonical error code)
    pub errors_total: CounterVec,

    /// Request duration in seconds (by method)
    pub request_duration_seconds: HistogramVec,

    /// Handler faults recovered at the interceptor boundary (by method)
    pub panics_total: CounterVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Connection pools
    // ─────────────────────────────────────────────────────────────────────────
    /// Failures to establish or borrow a pooled connection (by target)
    pub connection_errors_total: CounterVec,

    /// Active bidirectional streams
    pub active_streams: Gauge,

    // ─────────────────────────────────────────────────────────────────────────
    // Discovery registry
    // ─────────────────────────────────────────────────────────────────────────
    /// Currently registered services
    pub services_registered: Gauge,

    /// Service change events emitted (by type: added/updated/removed)
    pub service_events_total: CounterVec,

    /// Events dropped instead of delivered (by reason)
    pub events_dropped_total: CounterVec,

    /// Health probes executed (by result: healthy/unhealthy/error)
    pub health_checks_total: CounterVec,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            requests_total: register_counter_vec!(
                "silta_requests_total",
                "Total RPC requests",
                &["method"]
            )
            .map_err(|e| metrics_error("requests_total", e))?,

            errors_total: register_counter_vec!(
                "silta_errors_total",
                "Total failed RPC requests",
                &["method", "code"]
            )
            .map_err(|e| metrics_error("errors_total", e))?,

            request_duration_seconds: register_histogram_vec!(
                "silta_request_duration_seconds",
                "RPC request duration",
                &["method"],
                // Buckets: 1ms to 30s, matching the default call timeout
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
            )
            .map_err(|e| metrics_error("request_duration_seconds", e))?,

            panics_total: register_counter_vec!(
                "silta_panics_total",
                "Handler faults recovered by the supervisor boundary",
                &["method"]
            )
            .map_err(|e| metrics_error("panics_total", e))?,

            connection_errors_total: register_counter_vec!(
                "silta_connection_errors_total",
                "Failures to establish or borrow pooled connections",
                &["target"]
            )
            .map_err(|e| metrics_error("connection_errors_total", e))?,

            active_streams: register_gauge!(
                "silta_active_streams",
                "Number of active bidirectional streams"
            )
            .map_err(|e| metrics_error("active_streams", e))?,

            services_registered: register_gauge!(
                "silta_services_registered",
                "Number of currently registered services"
            )
            .map_err(|e| metrics_error("services_registered", e))?,

            service_events_total: register_counter_vec!(
                "silta_service_events_total",
                "Service change events emitted",
                &["type"]
            )
            .map_err(|e| metrics_error("service_events_total", e))?,

            events_dropped_total: register_counter_vec!(
                "silta_events_dropped_total",
                "Events dropped instead of delivered",
                &["reason"]
            )
            .map_err(|e| metrics_error("events_dropped_total", e))?,

            health_checks_total: register_counter_vec!(
                "silta_health_checks_total",
                "Health probes executed",
                &["result"]
            )
            .map_err(|e| metrics_error("health_checks_total", e))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| BridgeError::new(ErrorKind::Internal, "failed to initialize metrics"))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    /// Record one request and its duration
    pub fn record_request(&self, method: &str, seconds: f64) {
        self.requests_total.with_label_values(&[method]).inc();
        self.request_duration_seconds
            .with_label_values(&[method])
            .observe(seconds);
    }

    /// Record a failed request keyed by canonical code
    pub fn record_error(&self, method: &str, code: &str) {
        self.errors_total.with_label_values(&[method, code]).inc();
    }

    /// Record a recovered handler fault
    pub fn record_panic(&self, method: &str) {
        self.panics_total.with_label_values(&[method]).inc();
    }

    /// Record a connection failure for a target
    pub fn record_connection_error(&self, target: &str) {
        self.connection_errors_total
            .with_label_values(&[target])
            .inc();
    }

    /// Increment active streams
    pub fn inc_streams(&self) {
        self.active_streams.inc();
    }

    /// Decrement active streams
    pub fn dec_streams(&self) {
        self.active_streams.dec();
    }

    /// Update the registered-services gauge
    pub fn set_services_registered(&self, count: usize) {
        self.services_registered.set(count as f64);
    }

    /// Record an emitted service change event
    pub fn record_service_event(&self, event_type: &str) {
        self.service_events_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Record a dropped event
    pub fn record_dropped(&self, reason: &str) {
        self.events_dropped_total.with_label_values(&[reason]).inc();
    }

    /// Record a health probe outcome
    pub fn record_health_check(&self, result: &str) {
        self.health_checks_total.with_label_values(&[result]).inc();
    }
}

fn metrics_error(name: &str, err: prometheus::Error) -> BridgeError {
    BridgeError::new(ErrorKind::Internal, format!("metrics {name}: {err}"))
}

/// Gather all metrics and encode as Prometheus text format
///
/// Returns the metrics as a String, ready to be served via HTTP.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

/// Gather metric values as `name → value` pairs for the GetMetrics RPC
///
/// `names` filters by metric family name; empty selects all bridge
/// metrics. Vector families are flattened as `name{label="v",...}`.
pub fn snapshot(names: &[String]) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    for family in prometheus::gather() {
        let fname = family.get_name().to_string();
        if !names.is_empty() && !names.iter().any(|n| n == &fname) {
            continue;
        }
        for metric in family.get_metric() {
            let mut key = fname.clone();
            if !metric.get_label().is_empty() {
                let labels: Vec<String> = metric
                    .get_label()
                    .iter()
                    .map(|l| format!("{}=\"{}\"", l.get_name(), l.get_value()))
                    .collect();
                key = format!("{}{{{}}}", fname, labels.join(","));
            }
            let value = if metric.has_counter() {
                metric.get_counter().get_value()
            } else if metric.has_gauge() {
                metric.get_gauge().get_value()
            } else if metric.has_histogram() {
                metric.get_histogram().get_sample_sum()
            } else {
                continue;
            };
            out.insert(key, value.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        // Metrics::init() may fail if already initialized from another test
        // so we just check get() works after any successful init
        let _ = Metrics::init();
        if let Some(metrics) = Metrics::get() {
            metrics.record_request("/silta.v1.BridgeService/SendMessage", 0.01);
            metrics.record_error("/silta.v1.BridgeService/SendMessage", "UNAVAILABLE");
            metrics.set_services_registered(3);
        }
    }

    #[test]
    fn test_gather_contains_registered_families() {
        let _ = Metrics::init();
        if Metrics::get().is_some() {
            let text = gather();
            assert!(text.contains("silta_requests_total"));
        }
    }

    #[test]
    fn test_snapshot_filters_by_name() {
        let _ = Metrics::init();
        if let Some(metrics) = Metrics::get() {
            metrics.record_service_event("added");

            let all = snapshot(&[]);
            assert!(all.keys().any(|k| k.starts_with("silta_service_events_total")));

            let filtered = snapshot(&["silta_service_events_total".to_string()]);
            assert!(!filtered.is_empty());
            assert!(filtered
                .keys()
                .all(|k| k.starts_with("silta_service_events_total")));
        }
    }
}
