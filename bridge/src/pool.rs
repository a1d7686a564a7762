//! Round-robin connection pool for one gRPC target
//!
//! A pool owns a fixed number of persistent channels to a single target
//! and hands them out round-robin. Initialization is all-or-nothing: a
//! dial failure closes everything opened so far and leaves the pool
//! empty, so callers never observe a partially built pool.

use crate::config::GrpcConfig;
use crate::error::{BridgeError, ErrorKind, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, warn};

/// Dials one connection to a target
///
/// The pool goes through this seam instead of calling tonic directly so
/// transports and tests can substitute dialing behavior.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Establish one connection to `target`
    async fn dial(&self, target: &str) -> Result<Channel>;
}

/// Production dialer carrying the adapter's client options
///
/// Every dial applies the configured connect timeout, request timeout,
/// keepalive parameters, and either TLS or plaintext.
pub struct GrpcDialer {
    dial_timeout: Duration,
    client_timeout: Duration,
    client_keepalive: Duration,
    keepalive_timeout: Duration,
    tls: Option<ClientTlsConfig>,
}

impl GrpcDialer {
    /// Build a dialer from the adapter configuration
    ///
    /// TLS material is loaded eagerly so a bad path fails at
    /// construction, not on first call.
    pub async fn from_config(config: &GrpcConfig) -> Result<Self> {
        let tls = if config.enable_tls {
            Some(client_tls_config(config).await?)
        } else {
            None
        };
        Ok(Self {
            dial_timeout: config.dial_timeout,
            client_timeout: config.client_timeout,
            client_keepalive: config.client_keepalive,
            keepalive_timeout: config.keepalive_timeout,
            tls,
        })
    }
}

async fn client_tls_config(config: &GrpcConfig) -> Result<ClientTlsConfig> {
    let ca_file = config.tls_ca_file.as_deref().ok_or_else(|| {
        BridgeError::new(
            ErrorKind::FailedPrecondition,
            "TLS enabled but no CA certificate file configured",
        )
    })?;
    let pem = tokio::fs::read(ca_file).await.map_err(|e| {
        BridgeError::new(
            ErrorKind::FailedPrecondition,
            format!("failed to read CA certificate {ca_file}: {e}"),
        )
    })?;
    Ok(ClientTlsConfig::new().ca_certificate(tonic::transport::Certificate::from_pem(pem)))
}

#[async_trait]
impl Dialer for GrpcDialer {
    async fn dial(&self, target: &str) -> Result<Channel> {
        let uri = if target.contains("://") {
            target.to_string()
        } else {
            format!("http://{target}")
        };

        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| BridgeError::new(ErrorKind::InvalidArgument, format!("invalid target {target}: {e}")))?
            .connect_timeout(self.dial_timeout)
            .timeout(self.client_timeout)
            .http2_keep_alive_interval(self.client_keepalive)
            .keep_alive_timeout(self.keepalive_timeout)
            .keep_alive_while_idle(true);

        if let Some(tls) = &self.tls {
            endpoint = endpoint
                .tls_config(tls.clone())
                .map_err(|e| BridgeError::new(ErrorKind::FailedPrecondition, e.to_string()))?;
        }

        endpoint
            .connect()
            .await
            .map_err(|e| BridgeError::connection(format!("failed to dial {target}: {e}")))
    }
}

struct PoolInner {
    connections: Vec<Channel>,
    cursor: usize,
}

/// Fixed-size pool of live channels to one target, served round-robin
pub struct ConnectionPool {
    target: String,
    size: usize,
    dialer: Arc<dyn Dialer>,
    inner: Mutex<PoolInner>,
}

impl ConnectionPool {
    /// Create an empty pool; call [`initialize`](Self::initialize) to dial
    pub fn new(target: impl Into<String>, size: usize, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            target: target.into(),
            size,
            dialer,
            inner: Mutex::new(PoolInner {
                connections: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Target address this pool serves
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Dial the configured number of connections
    ///
    /// All-or-nothing: on any dial failure, connections opened in this
    /// attempt are closed and the pool stays empty. Calling on an
    /// already-initialized pool is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.connections.is_empty() {
            return Ok(());
        }

        let mut dialed = Vec::with_capacity(self.size);
        for i in 0..self.size {
            match self.dialer.dial(&self.target).await {
                Ok(conn) => dialed.push(conn),
                Err(e) => {
                    warn!(
                        target = %self.target,
                        dialed = i,
                        error = %e,
                        "Pool initialization failed, closing partial pool"
                    );
                    // Dropping the channels closes them
                    dialed.clear();
                    return Err(e);
                }
            }
        }

        debug!(target = %self.target, size = self.size, "Connection pool initialized");
        inner.connections = dialed;
        inner.cursor = 0;
        Ok(())
    }

    /// Borrow the next connection, round-robin
    pub async fn get(&self) -> Result<Channel> {
        self.get_slot().await.map(|(_, conn)| conn)
    }

    /// Round-robin selection, also reporting which slot was handed out
    ///
    /// Channels carry no identity of their own, so the slot index is the
    /// observable handle for the selection order.
    async fn get_slot(&self) -> Result<(usize, Channel)> {
        let mut inner = self.inner.lock().await;
        if inner.connections.is_empty() {
            return Err(BridgeError::new(
                ErrorKind::Unavailable,
                format!("no connections available in pool for {}", self.target),
            ));
        }
        let slot = inner.cursor;
        let conn = inner.connections[slot].clone();
        inner.cursor = (slot + 1) % inner.connections.len();
        Ok((slot, conn))
    }

    /// Close every connection and clear the pool
    ///
    /// Safe to call on an empty or partially failed pool.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.connections.clear();
        inner.cursor = 0;
    }

    /// Number of live connections
    pub async fn len(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Whether the pool holds no connections
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.connections.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Dialer that hands out lazy channels and can fail at a chosen dial
    pub(crate) struct ScriptedDialer {
        pub dials: AtomicUsize,
        fail_at: Option<usize>,
    }

    impl ScriptedDialer {
        pub fn ok() -> Self {
            Self {
                dials: AtomicUsize::new(0),
                fail_at: None,
            }
        }

        pub fn failing_at(k: usize) -> Self {
            Self {
                dials: AtomicUsize::new(0),
                fail_at: Some(k),
            }
        }
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self, target: &str) -> Result<Channel> {
            let n = self.dials.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_at {
                return Err(BridgeError::connection(format!(
                    "scripted dial failure to {target}"
                )));
            }
            // Lazy channels are valid handles without a live peer
            Ok(Endpoint::from_static("http://127.0.0.1:1").connect_lazy())
        }
    }

    #[tokio::test]
    async fn test_initialize_dials_exactly_size() {
        let dialer = Arc::new(ScriptedDialer::ok());
        let pool = ConnectionPool::new("svc:9000", 4, Arc::clone(&dialer) as Arc<dyn Dialer>);

        pool.initialize().await.unwrap();
        assert_eq!(pool.len().await, 4);
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_initialize_is_all_or_nothing() {
        // Fail on the third of five dials: nothing may remain open
        let dialer = Arc::new(ScriptedDialer::failing_at(2));
        let pool = ConnectionPool::new("svc:9000", 5, dialer as Arc<dyn Dialer>);

        let err = pool.initialize().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert_eq!(pool.len().await, 0);

        let err = pool.get().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_initialize_twice_is_noop() {
        let dialer = Arc::new(ScriptedDialer::ok());
        let pool = ConnectionPool::new("svc:9000", 2, Arc::clone(&dialer) as Arc<dyn Dialer>);

        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_cycles_round_robin() {
        let dialer = Arc::new(ScriptedDialer::ok());
        let pool = ConnectionPool::new("svc:9000", 3, dialer as Arc<dyn Dialer>);
        pool.initialize().await.unwrap();

        // N+1 gets over N connections return them in cyclic order,
        // wrapping back to the first
        let mut order = Vec::new();
        for _ in 0..4 {
            let (slot, _conn) = pool.get_slot().await.unwrap();
            order.push(slot);
        }
        assert_eq!(order, vec![0, 1, 2, 0]);
    }

    #[tokio::test]
    async fn test_get_on_empty_pool_fails() {
        let dialer = Arc::new(ScriptedDialer::ok());
        let pool = ConnectionPool::new("svc:9000", 3, dialer as Arc<dyn Dialer>);

        let err = pool.get().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert!(err.message.contains("svc:9000"));
    }

    #[tokio::test]
    async fn test_close_clears_and_is_idempotent() {
        let dialer = Arc::new(ScriptedDialer::ok());
        let pool = ConnectionPool::new("svc:9000", 2, dialer as Arc<dyn Dialer>);
        pool.initialize().await.unwrap();

        pool.close().await;
        assert!(pool.is_empty().await);

        // Safe after a failed initialize and when already empty
        pool.close().await;
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_then_reinitialize() {
        let dialer = Arc::new(ScriptedDialer::ok());
        let pool = ConnectionPool::new("svc:9000", 2, Arc::clone(&dialer) as Arc<dyn Dialer>);

        pool.initialize().await.unwrap();
        pool.close().await;
        pool.initialize().await.unwrap();
        assert_eq!(pool.len().await, 2);
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 4);
    }
}
