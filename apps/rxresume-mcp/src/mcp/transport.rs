use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::handler::McpHandler;
use super::protocol::{JsonRpcResponse, PARSE_ERROR};
use crate::sse::{Frame, FrameSink, SessionId, SessionTransport, TransportError};

/// Path clients POST their JSON-RPC messages to.
pub const MESSAGES_PATH: &str = "/messages";

/// MCP over SSE for one session.
///
/// Inbound messages are queued to a per-session worker so the HTTP POST that
/// carried them is acknowledged without waiting for the (possibly slow) tool
/// call. The worker answers in arrival order on the session's event stream.
pub struct McpTransport {
    handler: Arc<McpHandler>,
    retry_hint: Duration,
    queue_capacity: usize,
    binding: Mutex<Binding>,
}

enum Binding {
    Unbound,
    Bound {
        sink: FrameSink,
        queue: mpsc::Sender<Value>,
        worker: JoinHandle<()>,
    },
    Closed,
}

impl Binding {
    fn queue(&self) -> Result<mpsc::Sender<Value>, TransportError> {
        match self {
            Binding::Bound { queue, .. } => Ok(queue.clone()),
            Binding::Closed => Err(TransportError::Closed),
            Binding::Unbound => Err(TransportError::Internal(
                "message routed before handshake".into(),
            )),
        }
    }

    fn sink(&self) -> Result<FrameSink, TransportError> {
        match self {
            Binding::Bound { sink, .. } => Ok(sink.clone()),
            Binding::Closed => Err(TransportError::Closed),
            Binding::Unbound => Err(TransportError::Internal(
                "frame sent before handshake".into(),
            )),
        }
    }
}

impl McpTransport {
    pub fn new(handler: Arc<McpHandler>, retry_hint: Duration, queue_capacity: usize) -> Self {
        Self {
            handler,
            retry_hint,
            queue_capacity: queue_capacity.max(1),
            binding: Mutex::new(Binding::Unbound),
        }
    }

    /// Echoes a parse failure onto the event stream as a JSON-RPC error.
    async fn report_parse_error(&self, err: &TransportError) {
        let response = JsonRpcResponse::error(Value::Null, PARSE_ERROR, err.to_string());
        let Ok(data) = serde_json::to_string(&response) else {
            return;
        };
        if let Err(e) = self.send_frame(Frame::message(data)).await {
            debug!(error = %e, "Parse error not delivered");
        }
    }
}

/// Parses an inbound body. Only a JSON object or a non-empty batch array is
/// accepted.
fn parse_inbound(raw: &[u8]) -> Result<Value, TransportError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| TransportError::Malformed(format!("invalid JSON: {e}")))?;
    match &value {
        Value::Object(_) => Ok(value),
        Value::Array(items) if !items.is_empty() => Ok(value),
        Value::Array(_) => Err(TransportError::Malformed("empty batch".into())),
        _ => Err(TransportError::Malformed(
            "expected a JSON-RPC object".into(),
        )),
    }
}

async fn run_worker(
    session_id: SessionId,
    handler: Arc<McpHandler>,
    sink: FrameSink,
    mut queue: mpsc::Receiver<Value>,
) {
    while let Some(message) = queue.recv().await {
        let Some(response) = handler.handle(message).await else {
            continue;
        };
        let data = match serde_json::to_string(&response) {
            Ok(data) => data,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to encode response");
                continue;
            }
        };
        if sink.send(Frame::message(data)).await.is_err() {
            debug!(session_id = %session_id, "Event stream gone, stopping worker");
            break;
        }
    }
}

#[async_trait]
impl SessionTransport for McpTransport {
    async fn start(&self, session_id: SessionId, sink: FrameSink) -> Result<(), TransportError> {
        let mut binding = self.binding.lock().await;
        match *binding {
            Binding::Unbound => {}
            Binding::Bound { .. } => {
                return Err(TransportError::Handshake("transport already started".into()))
            }
            Binding::Closed => return Err(TransportError::Closed),
        }

        sink.send(Frame::Event {
            event: "endpoint",
            data: format!("{MESSAGES_PATH}?sessionId={session_id}"),
            retry: Some(self.retry_hint),
        })
        .await?;

        let (queue, rx) = mpsc::channel(self.queue_capacity);
        let worker = tokio::spawn(run_worker(
            session_id,
            self.handler.clone(),
            sink.clone(),
            rx,
        ));

        *binding = Binding::Bound {
            sink,
            queue,
            worker,
        };
        Ok(())
    }

    async fn handle_inbound(&self, raw: Bytes) -> Result<(), TransportError> {
        let message = match parse_inbound(&raw) {
            Ok(message) => message,
            Err(e) => {
                self.report_parse_error(&e).await;
                return Err(e);
            }
        };

        let queue = self.binding.lock().await.queue()?;
        queue
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        let sink = self.binding.lock().await.sink()?;
        sink.send(frame).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let previous = std::mem::replace(&mut *self.binding.lock().await, Binding::Closed);
        if let Binding::Bound { worker, .. } = previous {
            worker.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tools::ToolRegistry;

    fn transport() -> McpTransport {
        let handler = Arc::new(McpHandler::new(Arc::new(ToolRegistry::new())));
        McpTransport::new(handler, Duration::from_millis(1500), 8)
    }

    #[tokio::test]
    async fn test_start_emits_endpoint_event_with_retry_hint() {
        let transport = transport();
        let (sink, mut frames) = FrameSink::channel(4);
        let id = SessionId::generate();

        transport.start(id, sink).await.unwrap();

        assert_eq!(
            frames.recv().await.unwrap(),
            Frame::Event {
                event: "endpoint",
                data: format!("/messages?sessionId={id}"),
                retry: Some(Duration::from_millis(1500)),
            }
        );
    }

    #[tokio::test]
    async fn test_start_twice_is_a_handshake_error() {
        let transport = transport();
        let (sink, _frames) = FrameSink::channel(4);
        let id = SessionId::generate();
        transport.start(id, sink.clone()).await.unwrap();

        let err = transport.start(id, sink).await.unwrap_err();
        assert!(matches!(err, TransportError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_responses_arrive_as_message_events_in_order() {
        let transport = transport();
        let (sink, mut frames) = FrameSink::channel(8);
        transport.start(SessionId::generate(), sink).await.unwrap();
        frames.recv().await.unwrap();

        for id in 1..=3 {
            let body = json!({ "jsonrpc": "2.0", "id": id, "method": "ping" });
            transport
                .handle_inbound(Bytes::from(body.to_string()))
                .await
                .unwrap();
        }

        for expected in 1..=3 {
            let Frame::Event { event, data, .. } = frames.recv().await.unwrap() else {
                panic!("expected an event frame");
            };
            assert_eq!(event, "message");
            let response: Value = serde_json::from_str(&data).unwrap();
            assert_eq!(response["id"], expected);
        }
    }

    #[tokio::test]
    async fn test_inbound_before_start_is_an_internal_error() {
        let err = transport()
            .handle_inbound(Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Internal(_)));
        assert!(!err.is_connection_related());
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_rejected_and_echoed_as_parse_errors() {
        let transport = transport();
        let (sink, mut frames) = FrameSink::channel(4);
        transport.start(SessionId::generate(), sink).await.unwrap();
        frames.recv().await.unwrap();

        for body in ["not json", "42", "[]", "\"ping\""] {
            let err = transport
                .handle_inbound(Bytes::from_static(body.as_bytes()))
                .await
                .unwrap_err();
            assert!(matches!(err, TransportError::Malformed(_)), "body: {body}");

            let Frame::Event { event, data, .. } = frames.recv().await.unwrap() else {
                panic!("expected an event frame");
            };
            assert_eq!(event, "message");
            let response: Value = serde_json::from_str(&data).unwrap();
            assert_eq!(response["error"]["code"], PARSE_ERROR, "body: {body}");
            assert_eq!(response["id"], Value::Null);
        }
    }

    #[tokio::test]
    async fn test_send_frame_writes_to_the_bound_stream() {
        let transport = transport();
        assert!(matches!(
            transport.send_frame(Frame::KeepAlive).await,
            Err(TransportError::Internal(_))
        ));

        let (sink, mut frames) = FrameSink::channel(4);
        transport.start(SessionId::generate(), sink).await.unwrap();
        frames.recv().await.unwrap();

        transport.send_frame(Frame::KeepAlive).await.unwrap();
        assert_eq!(frames.recv().await, Some(Frame::KeepAlive));
    }

    #[tokio::test]
    async fn test_closed_transport_reports_closed() {
        let transport = transport();
        let (sink, _frames) = FrameSink::channel(4);
        transport.start(SessionId::generate(), sink).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport
            .handle_inbound(Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .unwrap_err();
        assert!(err.is_connection_related());
        assert!(matches!(
            transport.send_frame(Frame::KeepAlive).await,
            Err(TransportError::Closed)
        ));
    }
}
