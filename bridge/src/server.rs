//! BridgeService implementation
//!
//! Hosts the three wire operations behind the interceptor chain:
//! unary `SendMessage`, bidirectional `Stream`, and `GetMetrics`.
//! Message semantics live behind the [`MessageHandler`] seam so
//! deployments plug in routing or processing without touching the
//! transport.

use crate::error::BridgeError;
use crate::interceptor;
use crate::metrics::{self, Metrics};
use crate::proto::bridge_service_server::BridgeService;
use crate::proto::{BridgeMessage, MetricsRequest, MetricsResponse};
use async_trait::async_trait;
use bytes::Bytes;
use silta_core::{epoch_millis, Message, MessageId};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

const METHOD_STREAM: &str = "/silta.v1.BridgeService/Stream";
const METHOD_SEND: &str = "/silta.v1.BridgeService/SendMessage";
const METHOD_METRICS: &str = "/silta.v1.BridgeService/GetMetrics";

/// Per-stream outbound buffer, in messages
const STREAM_BUFFER: usize = 128;

/// Application seam for inbound messages
///
/// Every message arriving over `SendMessage` or `Stream` goes through
/// `handle`; the returned message is sent back to the caller.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one message and produce the reply
    async fn handle(&self, msg: Message) -> Result<Message, BridgeError>;
}

/// Handler that acknowledges by echoing the message back
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, msg: Message) -> Result<Message, BridgeError> {
        Ok(msg)
    }
}

/// gRPC-facing bridge service
pub struct BridgeServer {
    handler: Arc<dyn MessageHandler>,
    /// Handler deadline applied by the interceptor chain
    timeout: Duration,
    /// Copies of stream traffic for [`Adapter::receive`] consumers, if wired
    ///
    /// [`Adapter::receive`]: silta_core::Adapter::receive
    inbound: Option<mpsc::Sender<Message>>,
}

impl BridgeServer {
    /// Create a server around a message handler
    pub fn new(handler: Arc<dyn MessageHandler>, timeout: Duration) -> Self {
        Self {
            handler,
            timeout,
            inbound: None,
        }
    }

    /// Also deliver stream traffic to an inbound queue
    pub fn with_inbound(mut self, inbound: mpsc::Sender<Message>) -> Self {
        self.inbound = Some(inbound);
        self
    }
}

fn from_proto(msg: BridgeMessage) -> Message {
    let id = MessageId::from_string(&msg.id).unwrap_or_default();
    Message {
        id,
        message_type: msg.r#type,
        content: Bytes::from(msg.content),
        metadata: msg.metadata,
        timestamp_ms: if msg.timestamp != 0 {
            msg.timestamp
        } else {
            epoch_millis()
        },
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

#[tonic::async_trait]
impl BridgeService for BridgeServer {
    type StreamStream = Pin<Box<dyn Stream<Item = Result<BridgeMessage, Status>> + Send>>;

    async fn stream(
        &self,
        request: Request<Streaming<BridgeMessage>>,
    ) -> Result<Response<Self::StreamStream>, Status> {
        let mut inbound_stream = request.into_inner();
        let handler = Arc::clone(&self.handler);
        let inbound = self.inbound.clone();
        let timeout = self.timeout;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        if let Some(metrics) = Metrics::get() {
            metrics.inc_streams();
        }
        debug!("Stream opened");

        tokio::spawn(async move {
            while let Some(next) = inbound_stream.next().await {
                let msg = match next {
                    Ok(proto) => from_proto(proto),
                    Err(status) => {
                        warn!(code = %status.code(), "Stream receive error");
                        break;
                    }
                };
                if let Some(inbound) = &inbound {
                    // Best-effort copy; a full queue never stalls the stream
                    let _ = inbound.try_send(msg.clone());
                }
                // Every stream message runs through the same chain as a
                // unary call, so a handler fault surfaces as INTERNAL
                // instead of silently ending the stream
                let handler = Arc::clone(&handler);
                let reply = interceptor::intercept(METHOD_STREAM, timeout, async move {
                    handler.handle(msg).await.map(to_proto).map_err(Status::from)
                })
                .await;
                let failed = reply.is_err();
                // An error item terminates the RPC with that status
                if tx.send(reply).await.is_err() || failed {
                    break;
                }
            }
            if let Some(metrics) = Metrics::get() {
                metrics.dec_streams();
            }
            debug!("Stream closed");
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn send_message(
        &self,
        request: Request<BridgeMessage>,
    ) -> Result<Response<BridgeMessage>, Status> {
        let handler = Arc::clone(&self.handler);
        let msg = from_proto(request.into_inner());

        interceptor::intercept(METHOD_SEND, self.timeout, async move {
            let reply = handler.handle(msg).await.map_err(Status::from)?;
            Ok(Response::new(to_proto(reply)))
        })
        .await
    }

    async fn get_metrics(
        &self,
        request: Request<MetricsRequest>,
    ) -> Result<Response<MetricsResponse>, Status> {
        let req = request.into_inner();
        interceptor::intercept(METHOD_METRICS, self.timeout, async move {
            debug!(client_id = %req.client_id, names = req.metric_names.len(), "Metrics requested");
            Ok(Response::new(MetricsResponse {
                metrics: metrics::snapshot(&req.metric_names),
                timestamp: epoch_millis(),
            }))
        })
        .await
    }
}
