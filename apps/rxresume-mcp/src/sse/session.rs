use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use super::transport::{SessionTransport, TransportError};

/// Opaque session identity. Time-ordered UUIDv7, never recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    /// Terminal. A disconnected session is never observable in the registry;
    /// the variant only appears in close logs.
    Disconnected,
}

/// A unit written to a session's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Event {
        event: &'static str,
        data: String,
        retry: Option<Duration>,
    },
    /// No-op comment line used to keep idle streams open.
    KeepAlive,
}

impl Frame {
    pub fn message(data: String) -> Self {
        Frame::Event {
            event: "message",
            data,
            retry: None,
        }
    }
}

/// Writing half of a session's raw event stream.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
}

impl FrameSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Waits for buffer space. Fails only once the reader is gone.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    /// Non-blocking write used by the heartbeat sweep.
    pub fn try_send(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

/// Per-session keep-alive retry bookkeeping.
///
/// Counts consecutive keep-alives that could not be queued because the client
/// stopped draining its stream. Each failure pushes the next attempt out by
/// `base * 2^(attempts - 1)`.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    pub attempts: u32,
    next_attempt_at: Option<Instant>,
}

impl ReconnectState {
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at.map_or(true, |at| now >= at)
    }

    pub fn is_backing_off(&self) -> bool {
        self.attempts > 0
    }

    /// Records a failed delivery and returns the new attempt count.
    pub fn record_failure(&mut self, now: Instant, base: Duration) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        let shift = (self.attempts - 1).min(16);
        let delay = base.saturating_mul(1u32 << shift);
        self.next_attempt_at = Some(now + delay);
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_attempt_at = None;
    }
}

/// One live client connection tracked by the registry.
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub peer_address: Option<SocketAddr>,
    pub created_at: DateTime<Utc>,
    pub reconnect: ReconnectState,
    /// Protocol-level channel. Shared only so calls can be awaited outside the
    /// registry lock; the registry entry is the owner responsible for closing it.
    pub(super) transport: Arc<dyn SessionTransport>,
    /// Raw stream handle; heartbeats bypass protocol framing.
    pub(super) output: FrameSink,
    /// Serializes inbound delivery so one session sees its messages in order.
    pub(super) inbound_order: Arc<Mutex<()>>,
}

impl Session {
    pub(super) fn new(
        id: SessionId,
        peer_address: Option<SocketAddr>,
        transport: Arc<dyn SessionTransport>,
        output: FrameSink,
    ) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            peer_address,
            created_at: Utc::now(),
            reconnect: ReconnectState::default(),
            transport,
            output,
            inbound_order: Arc::new(Mutex::new(())),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("peer_address", &self.peer_address)
            .field("created_at", &self.created_at)
            .field("reconnect_attempts", &self.reconnect.attempts)
            .finish_non_exhaustive()
    }
}
