//! Server-side interceptor chain
//!
//! Every inbound RPC runs through the same chain, innermost first:
//!
//! ```text
//! logging ─► metrics ─► fault recovery ─► deadline ─► handler
//! ```
//!
//! Outer stages observe the total latency of everything inside them.
//! Fault recovery is a supervisor boundary: the handler runs on its own
//! task, and a panic in it surfaces as an `INTERNAL` status to the
//! caller while the server keeps serving.

use crate::error::ErrorKind;
use crate::metrics::Metrics;
use std::future::Future;
use std::time::{Duration, Instant};
use tonic::Status;
use tracing::{debug, warn};

/// Run one handler future through the full interceptor chain
///
/// `method` is the full RPC path used for logs and metric labels.
/// `timeout` bounds handler execution; expiry yields `DEADLINE_EXCEEDED`.
pub async fn intercept<F, T>(method: &'static str, timeout: Duration, handler: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>> + Send + 'static,
    T: Send + 'static,
{
    let start = Instant::now();
    debug!(method, "Request received");

    let result = recover(method, deadline(method, timeout, handler)).await;

    let elapsed = start.elapsed().as_secs_f64();
    if let Some(metrics) = Metrics::get() {
        metrics.record_request(method, elapsed);
        if let Err(status) = &result {
            metrics.record_error(method, ErrorKind::from(status.code()).as_str());
        }
    }

    match &result {
        Ok(_) => debug!(method, elapsed_ms = %format!("{:.2}", elapsed * 1000.0), "Request completed"),
        Err(status) => warn!(
            method,
            code = %status.code(),
            message = %status.message(),
            elapsed_ms = %format!("{:.2}", elapsed * 1000.0),
            "Request failed"
        ),
    }
    result
}

/// Bound the handler with the configured per-call deadline
async fn deadline<F, T>(method: &'static str, timeout: Duration, handler: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match tokio::time::timeout(timeout, handler).await {
        Ok(result) => result,
        Err(_) => Err(Status::deadline_exceeded(format!(
            "{method} exceeded {}s handler deadline",
            timeout.as_secs()
        ))),
    }
}

/// Supervisor boundary converting handler panics into `INTERNAL`
///
/// The handler runs on a spawned task so an unwind stops at the join
/// point instead of tearing through the dispatch loop.
async fn recover<F, T>(method: &'static str, handler: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(handler).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            warn!(method, "Handler fault recovered");
            if let Some(metrics) = Metrics::get() {
                metrics.record_panic(method);
            }
            Err(Status::internal("internal error"))
        }
        Err(_) => Err(Status::cancelled("handler task cancelled")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    const METHOD: &str = "/silta.v1.BridgeService/SendMessage";

    #[tokio::test]
    async fn test_success_passes_through() {
        let result = intercept(METHOD, Duration::from_secs(1), async { Ok(42u32) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_handler_error_passes_through() {
        let result: Result<(), Status> = intercept(METHOD, Duration::from_secs(1), async {
            Err(Status::not_found("missing"))
        })
        .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_panic_becomes_internal() {
        let result: Result<(), Status> = intercept(METHOD, Duration::from_secs(1), async {
            panic!("handler bug")
        })
        .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn test_deadline_enforced() {
        let result: Result<(), Status> = intercept(METHOD, Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result.unwrap_err().code(), tonic::Code::DeadlineExceeded);
    }
}
