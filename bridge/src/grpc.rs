//! gRPC transport adapter
//!
//! Binds the bridge to gRPC in both directions:
//!
//! ```text
//! inbound    Server (concurrency limit, keepalive, optional TLS)
//!               └─► interceptor chain ─► BridgeService handlers
//!
//! outbound   pools: target ─► ConnectionPool (round-robin channels)
//!               └─► call() / stream() with canonical error mapping
//! ```
//!
//! Callers of [`GrpcAdapter::call`] and [`GrpcAdapter::stream`] never
//! see raw transport statuses; every failure is translated into
//! [`BridgeError`] first.

use crate::config::GrpcConfig;
use crate::error::{BridgeError, ErrorKind, Result};
use crate::metrics::Metrics;
use crate::pool::{ConnectionPool, Dialer, GrpcDialer};
use crate::proto::bridge_service_server::{BridgeService, BridgeServiceServer};
use crate::proto::BridgeMessage;
use parking_lot::{Mutex, RwLock};
use silta_core::{Adapter, AdapterError, AdapterRuntime, AdapterState, AdapterStats, AdapterStatus, Message};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tonic::transport::{Channel, Identity, Server, ServerTlsConfig};
use tracing::{debug, info, warn};

/// Capacity of the inbound message queue fed by server streams
const INBOUND_QUEUE: usize = 1024;

/// gRPC binding of the bridge [`Adapter`] contract
pub struct GrpcAdapter {
    name: String,
    config: GrpcConfig,
    runtime: AdapterRuntime,
    /// Built at `initialize`; `None` before that
    dialer: RwLock<Option<Arc<dyn Dialer>>>,
    /// One pool per target, created lazily
    pools: RwLock<HashMap<String, Arc<ConnectionPool>>>,
    /// Messages delivered by inbound server streams
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    /// Graceful-stop trigger for a running server
    server_shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl GrpcAdapter {
    /// Create an adapter; dials nothing until `initialize`/`connect`
    pub fn new(name: impl Into<String>, config: GrpcConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        Self {
            name: name.into(),
            config,
            runtime: AdapterRuntime::new(),
            dialer: RwLock::new(None),
            pools: RwLock::new(HashMap::new()),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            server_shutdown: Mutex::new(None),
        }
    }

    /// Adapter configuration
    pub fn config(&self) -> &GrpcConfig {
        &self.config
    }

    /// Sender side of the inbound queue
    ///
    /// Server wiring pushes messages arriving on streams here; they
    /// surface through [`Adapter::receive`].
    pub fn inbound_sender(&self) -> mpsc::Sender<Message> {
        self.inbound_tx.clone()
    }

    fn dialer(&self) -> Result<Arc<dyn Dialer>> {
        self.dialer.read().clone().ok_or_else(|| {
            BridgeError::new(
                ErrorKind::FailedPrecondition,
                "adapter not initialized, call initialize first",
            )
        })
    }

    /// Look up or create the pool for a target
    ///
    /// Map access is double-checked so concurrent first requests for an
    /// unseen target agree on one pool; dialing happens on the pool's
    /// own lock, never under the map lock.
    fn pool_for(&self, target: &str) -> Result<Arc<ConnectionPool>> {
        if let Some(pool) = self.pools.read().get(target) {
            return Ok(Arc::clone(pool));
        }
        let dialer = self.dialer()?;
        let mut pools = self.pools.write();
        let pool = pools.entry(target.to_string()).or_insert_with(|| {
            Arc::new(ConnectionPool::new(target, self.config.pool_size, dialer))
        });
        Ok(Arc::clone(pool))
    }

    /// Borrow a connection to a target, creating its pool on first use
    pub async fn get_connection(&self, target: &str) -> Result<Channel> {
        let pool = self.pool_for(target)?;
        if let Err(e) = pool.initialize().await {
            if let Some(metrics) = Metrics::get() {
                metrics.record_connection_error(target);
            }
            return Err(e);
        }
        pool.get().await
    }

    /// Invoke a unary method on a target
    ///
    /// `method` is the full RPC path, e.g.
    /// `"/silta.v1.BridgeService/SendMessage"`. The call is bounded by
    /// the configured client timeout; failures come back mapped into
    /// the canonical taxonomy, with any structured details preserved.
    pub async fn call<Req, Resp>(&self, target: &str, method: &str, req: Req) -> Result<Resp>
    where
        Req: prost::Message + Send + 'static,
        Resp: prost::Message + Default + Send + 'static,
    {
        let started = Instant::now();
        let result = self.call_inner(target, method, req).await;

        if let Some(metrics) = Metrics::get() {
            metrics.record_request(method, started.elapsed().as_secs_f64());
            if let Err(e) = &result {
                metrics.record_error(method, e.kind.as_str());
            }
        }
        result
    }

    async fn call_inner<Req, Resp>(&self, target: &str, method: &str, req: Req) -> Result<Resp>
    where
        Req: prost::Message + Send + 'static,
        Resp: prost::Message + Default + Send + 'static,
    {
        let path = http::uri::PathAndQuery::try_from(method.to_string())
            .map_err(|e| BridgeError::new(ErrorKind::InvalidArgument, format!("invalid method path {method}: {e}")))?;

        let channel = self.get_connection(target).await?;
        let mut grpc = tonic::client::Grpc::new(channel)
            .max_decoding_message_size(self.config.max_recv_msg_size)
            .max_encoding_message_size(self.config.max_send_msg_size);

        let response = tokio::time::timeout(self.config.client_timeout, async {
            grpc.ready().await.map_err(BridgeError::from)?;
            let codec = tonic::codec::ProstCodec::default();
            grpc.unary(tonic::Request::new(req), path, codec)
                .await
                .map_err(BridgeError::from_status)
        })
        .await
        .map_err(|_| {
            BridgeError::new(
                ErrorKind::DeadlineExceeded,
                format!("{method} to {target} exceeded client timeout"),
            )
        })??;

        Ok(response.into_inner())
    }

    /// Resolve a connection for caller-established streaming
    ///
    /// Stream semantics vary per use site, so this hands back the live
    /// channel instead of opening the stream itself.
    pub async fn stream(&self, target: &str) -> Result<Channel> {
        self.get_connection(target).await
    }

    /// Number of target pools currently held
    pub fn pool_count(&self) -> usize {
        self.pools.read().len()
    }

    /// Serve `svc` on the configured address until `shutdown` is called
    ///
    /// Applies the concurrency ceiling, keepalive parameters, handler
    /// timeout, message-size limits, and TLS when configured. In-flight
    /// calls finish during shutdown; new calls are refused.
    pub async fn serve<T: BridgeService>(&self, svc: T) -> Result<()> {
        let addr = self.resolve_bind_addr().await?;
        let mut rx = {
            let (tx, rx) = watch::channel(false);
            *self.server_shutdown.lock() = Some(tx);
            rx
        };

        let mut builder = Server::builder()
            .concurrency_limit_per_connection(self.config.max_concurrent_calls as usize)
            .timeout(self.config.default_timeout)
            .http2_keepalive_interval(Some(self.config.keepalive_interval))
            .http2_keepalive_timeout(Some(self.config.keepalive_timeout))
            .tcp_nodelay(true);

        if self.config.enable_tls {
            builder = builder
                .tls_config(self.server_tls_config().await?)
                .map_err(|e| BridgeError::new(ErrorKind::FailedPrecondition, e.to_string()))?;
        }

        let service = BridgeServiceServer::new(svc)
            .max_decoding_message_size(self.config.max_recv_msg_size)
            .max_encoding_message_size(self.config.max_send_msg_size);

        info!(address = %addr, tls = self.config.enable_tls, "gRPC server listening");
        builder
            .add_service(service)
            .serve_with_shutdown(addr, async {
                let _ = rx.changed().await;
                info!("gRPC server draining");
            })
            .await
            .map_err(BridgeError::from)
    }

    async fn resolve_bind_addr(&self) -> Result<SocketAddr> {
        let address = &self.config.server_address;
        tokio::net::lookup_host(address)
            .await
            .map_err(|e| BridgeError::new(ErrorKind::InvalidArgument, format!("cannot resolve {address}: {e}")))?
            .next()
            .ok_or_else(|| {
                BridgeError::new(
                    ErrorKind::InvalidArgument,
                    format!("{address} resolved to no addresses"),
                )
            })
    }

    /// Server TLS from the configured certificate files
    ///
    /// Client certificate verification is enabled only when a CA file
    /// is configured.
    async fn server_tls_config(&self) -> Result<ServerTlsConfig> {
        let (cert_file, key_file) = match (&self.config.tls_cert_file, &self.config.tls_key_file) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(BridgeError::new(
                    ErrorKind::FailedPrecondition,
                    "TLS enabled but certificate or key file not configured",
                ))
            }
        };
        let cert = tokio::fs::read(cert_file).await.map_err(|e| {
            BridgeError::new(ErrorKind::FailedPrecondition, format!("failed to read {cert_file}: {e}"))
        })?;
        let key = tokio::fs::read(key_file).await.map_err(|e| {
            BridgeError::new(ErrorKind::FailedPrecondition, format!("failed to read {key_file}: {e}"))
        })?;

        let mut tls = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));
        if let Some(ca_file) = &self.config.tls_ca_file {
            let ca = tokio::fs::read(ca_file).await.map_err(|e| {
                BridgeError::new(ErrorKind::FailedPrecondition, format!("failed to read {ca_file}: {e}"))
            })?;
            tls = tls.client_ca_root(tonic::transport::Certificate::from_pem(ca));
        }
        Ok(tls)
    }

    /// Close every pool, clear the map, and stop a running server
    pub async fn stop(&self) {
        let pools: Vec<Arc<ConnectionPool>> = {
            let mut map = self.pools.write();
            map.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            debug!(target = %pool.target(), "Closing connection pool");
            pool.close().await;
        }

        let shutdown = self.server_shutdown.lock().take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
    }
}

fn to_proto(msg: Message) -> BridgeMessage {
    BridgeMessage {
        id: msg.id.to_string(),
        r#type: msg.message_type,
        content: msg.content.to_vec(),
        metadata: msg.metadata,
        timestamp: msg.timestamp_ms,
    }
}

#[async_trait::async_trait]
impl Adapter for GrpcAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "grpc"
    }

    async fn initialize(&self) -> std::result::Result<(), AdapterError> {
        if self.config.server_address.is_empty() {
            let err = AdapterError::Init("server address is required".to_string());
            self.runtime.record_error(&err);
            return Err(err);
        }
        let dialer = GrpcDialer::from_config(&self.config).await.map_err(|e| {
            let err = AdapterError::Init(e.to_string());
            self.runtime.record_error(&err);
            err
        })?;
        *self.dialer.write() = Some(Arc::new(dialer));
        self.runtime.transition(AdapterState::Connecting);
        info!(adapter = %self.name, address = %self.config.server_address, "gRPC adapter initialized");
        Ok(())
    }

    async fn connect(&self) -> std::result::Result<(), AdapterError> {
        let target = self.config.server_address.clone();
        if let Err(e) = self.get_connection(&target).await {
            let err = AdapterError::Connection(e.to_string());
            self.runtime.record_error(&err);
            return Err(err);
        }
        self.runtime.transition(AdapterState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> std::result::Result<(), AdapterError> {
        self.stop().await;
        self.runtime.transition(AdapterState::Disconnected);
        Ok(())
    }

    async fn shutdown(&self) -> std::result::Result<(), AdapterError> {
        self.stop().await;
        self.runtime.transition(AdapterState::Stopped);
        info!(adapter = %self.name, "gRPC adapter stopped");
        Ok(())
    }

    fn status(&self) -> AdapterStatus {
        self.runtime.status()
    }

    fn stats(&self) -> AdapterStats {
        self.runtime.stats()
    }

    async fn send(&self, msg: Message) -> std::result::Result<(), AdapterError> {
        let started = Instant::now();
        let target = self.config.server_address.clone();
        let result: Result<BridgeMessage> = self
            .call(&target, "/silta.v1.BridgeService/SendMessage", to_proto(msg))
            .await;

        match result {
            Ok(_) => {
                self.runtime.record_send();
                self.runtime.record_latency(started.elapsed());
                Ok(())
            }
            Err(e) => {
                warn!(adapter = %self.name, error = %e, "Send failed");
                let err = AdapterError::Send(e.to_string());
                self.runtime.record_error(&err);
                Err(err)
            }
        }
    }

    async fn receive(&self) -> std::result::Result<Option<Message>, AdapterError> {
        let msg = self.inbound_rx.lock().await.recv().await;
        if msg.is_some() {
            self.runtime.record_receive();
        }
        Ok(msg)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pool::tests::ScriptedDialer;
    use std::sync::atomic::Ordering;

    fn adapter_with_dialer(dialer: Arc<dyn Dialer>) -> GrpcAdapter {
        let adapter = GrpcAdapter::new("test-grpc", GrpcConfig::default());
        *adapter.dialer.write() = Some(dialer);
        adapter
    }

    #[tokio::test]
    async fn test_pool_created_once_per_target() {
        let dialer = Arc::new(ScriptedDialer::ok());
        let adapter = adapter_with_dialer(Arc::clone(&dialer) as Arc<dyn Dialer>);

        adapter.get_connection("svc-a:9000").await.unwrap();
        adapter.get_connection("svc-a:9000").await.unwrap();
        adapter.get_connection("svc-b:9000").await.unwrap();

        assert_eq!(adapter.pool_count(), 2);
        // Two pools, each dialed pool_size connections exactly once
        assert_eq!(
            dialer.dials.load(Ordering::SeqCst),
            2 * adapter.config.pool_size
        );
    }

    #[tokio::test]
    async fn test_concurrent_get_connection_single_pool() {
        let dialer = Arc::new(ScriptedDialer::ok());
        let adapter = Arc::new(adapter_with_dialer(Arc::clone(&dialer) as Arc<dyn Dialer>));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let adapter = Arc::clone(&adapter);
            handles.push(tokio::spawn(async move {
                adapter.get_connection("svc:9000").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(adapter.pool_count(), 1);
        assert_eq!(dialer.dials.load(Ordering::SeqCst), adapter.config.pool_size);
    }

    #[tokio::test]
    async fn test_failed_pool_init_surfaces_and_leaves_pool_empty() {
        let dialer = Arc::new(ScriptedDialer::failing_at(0));
        let adapter = adapter_with_dialer(dialer as Arc<dyn Dialer>);

        let err = adapter.get_connection("svc:9000").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);

        let pool = adapter.pool_for("svc:9000").unwrap();
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_uninitialized_adapter_refuses_connections() {
        let adapter = GrpcAdapter::new("test-grpc", GrpcConfig::default());
        let err = adapter.get_connection("svc:9000").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_stop_clears_pools() {
        let dialer = Arc::new(ScriptedDialer::ok());
        let adapter = adapter_with_dialer(dialer as Arc<dyn Dialer>);

        adapter.get_connection("svc-a:9000").await.unwrap();
        adapter.get_connection("svc-b:9000").await.unwrap();
        assert_eq!(adapter.pool_count(), 2);

        adapter.stop().await;
        assert_eq!(adapter.pool_count(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let adapter = GrpcAdapter::new("test-grpc", GrpcConfig::default());
        assert_eq!(adapter.status().state, AdapterState::Initializing);

        adapter.initialize().await.unwrap();
        assert_eq!(adapter.status().state, AdapterState::Connecting);

        adapter.shutdown().await.unwrap();
        assert_eq!(adapter.status().state, AdapterState::Stopped);
    }

    #[tokio::test]
    async fn test_initialize_rejects_empty_address() {
        let mut config = GrpcConfig::default();
        config.server_address = String::new();
        let adapter = GrpcAdapter::new("test-grpc", config);

        assert!(adapter.initialize().await.is_err());
        assert_eq!(adapter.status().state, AdapterState::Error);
    }

    #[test]
    fn test_message_to_proto() {
        let msg = Message::new("event", bytes::Bytes::from_static(b"payload"))
            .with_metadata("origin", "test");
        let proto = to_proto(msg.clone());

        assert_eq!(proto.id, msg.id.to_string());
        assert_eq!(proto.r#type, "event");
        assert_eq!(proto.content, b"payload");
        assert_eq!(proto.metadata.get("origin").map(String::as_str), Some("test"));
        assert_eq!(proto.timestamp, msg.timestamp_ms);
    }
}
