use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::session::{Frame, FrameSink, SessionId};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("outbound buffer full")]
    Backpressure,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("transport failure: {0}")]
    Internal(String),
}

impl TransportError {
    /// True when the underlying channel is gone and the session cannot recover.
    pub fn is_connection_related(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

/// The protocol channel bound to one session.
///
/// The connection manager never inspects frames; it only drives the lifecycle:
/// `start` once, `handle_inbound` for every routed message, `close` exactly
/// when the session leaves the registry.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Binds the transport to its session and raw output stream.
    async fn start(&self, session_id: SessionId, sink: FrameSink) -> Result<(), TransportError>;

    async fn handle_inbound(&self, raw: Bytes) -> Result<(), TransportError>;

    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
