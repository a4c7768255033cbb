//! Connection registry and per-session lifecycle.
//!
//! Sessions move `Connecting -> Ready -> Disconnected`; a disconnected session
//! is simply absent from the registry. The registry sits behind one
//! `tokio::sync::RwLock`. No transport call is awaited while it is held, so
//! the only operations that wait on the lock are registry inserts, removals
//! and state flips, all of which are short.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::heartbeat;
use super::session::{Frame, FrameSink, Session, SessionId, SessionState};
use super::transport::{SessionTransport, TransportError};
use crate::config::SseConfig;
use crate::errors::SessionError;

/// In-flight handshake for a freshly opened session.
pub struct Handshake(JoinHandle<Result<(), SessionError>>);

impl Handshake {
    pub async fn wait(self) -> Result<(), SessionError> {
        self.0
            .await
            .unwrap_or_else(|e| Err(SessionError::Fatal(format!("handshake task failed: {e}"))))
    }
}

/// Returned by [`SessionManager::open_session`] before the handshake resolves.
pub struct OpenedSession {
    pub id: SessionId,
    /// Reading half of the session's raw stream; the acceptor forwards it to the client.
    pub frames: mpsc::Receiver<Frame>,
    pub handshake: Handshake,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconnectSummary {
    pub sessions_backing_off: usize,
    pub pending_attempts: u32,
    pub max_attempts: u32,
    pub delay_base_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub ready_count: usize,
    pub connecting_count: usize,
    pub total_count: usize,
    pub reconnect_state: ReconnectSummary,
    pub uptime_secs: u64,
    pub accepting: bool,
}

/// Outcome of one heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub delivered: usize,
    pub deferred: usize,
    pub dropped: usize,
}

/// Owns every live session and drives its lifecycle.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: RwLock<HashMap<SessionId, Session>>,
    config: SseConfig,
    started_at: Instant,
    shutting_down: AtomicBool,
    closed_tx: watch::Sender<bool>,
    heartbeat: OnceLock<AbortHandle>,
    fatal: OnceLock<String>,
}

impl SessionManager {
    pub fn new(config: SseConfig) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                config,
                started_at: Instant::now(),
                shutting_down: AtomicBool::new(false),
                closed_tx,
                heartbeat: OnceLock::new(),
                fatal: OnceLock::new(),
            }),
        }
    }

    pub fn config(&self) -> &SseConfig {
        &self.inner.config
    }

    pub fn is_accepting(&self) -> bool {
        !self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Registers a `Connecting` session and starts its handshake in the background.
    ///
    /// The id is usable immediately; the handshake outcome is reported through
    /// [`OpenedSession::handshake`].
    pub async fn open_session(
        &self,
        peer_address: Option<SocketAddr>,
        transport: Arc<dyn SessionTransport>,
    ) -> Result<OpenedSession, SessionError> {
        if !self.is_accepting() {
            return Err(SessionError::ShuttingDown);
        }

        let (sink, frames) = FrameSink::channel(self.inner.config.buffer_size);

        let id = {
            let mut sessions = self.inner.sessions.write().await;
            // Shutdown drains under this lock, so re-check while holding it.
            if !self.is_accepting() {
                return Err(SessionError::ShuttingDown);
            }
            let mut id = SessionId::generate();
            while sessions.contains_key(&id) {
                id = SessionId::generate();
            }
            sessions.insert(
                id,
                Session::new(id, peer_address, transport.clone(), sink.clone()),
            );
            id
        };

        info!(session_id = %id, peer = ?peer_address, "Session opened");

        let manager = self.clone();
        let task = tokio::spawn(async move { manager.run_handshake(id, transport, sink).await });

        Ok(OpenedSession {
            id,
            frames,
            handshake: Handshake(task),
        })
    }

    async fn run_handshake(
        &self,
        id: SessionId,
        transport: Arc<dyn SessionTransport>,
        sink: FrameSink,
    ) -> Result<(), SessionError> {
        let timeout = self.inner.config.handshake_timeout;

        // A panic inside `start` comes back as a JoinError.
        let start = tokio::spawn(async move { transport.start(id, sink).await });
        let start_abort = start.abort_handle();

        let failure = match tokio::time::timeout(timeout, start).await {
            Ok(Ok(Ok(()))) => {
                if self.mark_ready(id).await {
                    info!(session_id = %id, "Session ready");
                    return Ok(());
                }
                // Closed while the handshake was in flight; never resurrect it.
                debug!(session_id = %id, "Session closed before handshake completed");
                SessionError::HandshakeFailed("session closed before handshake completed".into())
            }
            Ok(Ok(Err(e))) => SessionError::HandshakeFailed(e.to_string()),
            Ok(Err(e)) => {
                let err = SessionError::Fatal(format!("session {id}: handshake task failed: {e}"));
                self.close_session(id).await;
                self.report_fatal(&err).await;
                return Err(err);
            }
            Err(_) => {
                start_abort.abort();
                SessionError::HandshakeTimedOut(timeout.as_millis())
            }
        };

        warn!(session_id = %id, error = %failure, "Session handshake failed");
        self.close_session(id).await;
        Err(failure)
    }

    /// Flips `Connecting -> Ready`. Returns false if the session is gone or
    /// already past `Connecting`.
    async fn mark_ready(&self, id: SessionId) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(session) if session.state == SessionState::Connecting => {
                session.state = SessionState::Ready;
                true
            }
            _ => false,
        }
    }

    /// Delivers a raw inbound message to the session's transport.
    ///
    /// Messages for one session are handed over in arrival order. A
    /// connection-related failure disconnects that session only.
    pub async fn route_message(&self, id: SessionId, raw: Bytes) -> Result<(), SessionError> {
        let (transport, inbound_order) = {
            let sessions = self.inner.sessions.read().await;
            let session = sessions
                .get(&id)
                .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
            if session.state != SessionState::Ready {
                return Err(SessionError::NotReady(id.to_string()));
            }
            (session.transport.clone(), session.inbound_order.clone())
        };

        let _in_order = inbound_order.lock().await;

        match transport.handle_inbound(raw).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_related() => {
                warn!(session_id = %id, error = %e, "Connection lost while routing message");
                self.close_session(id).await;
                Err(SessionError::ConnectionLost(e.to_string()))
            }
            Err(TransportError::Malformed(msg)) => Err(SessionError::InvalidMessage(msg)),
            Err(e) => {
                let err = SessionError::Fatal(format!("session {id}: {e}"));
                self.report_fatal(&err).await;
                Err(err)
            }
        }
    }

    /// Removes the session and releases its transport. Returns whether it was present.
    pub async fn close_session(&self, id: SessionId) -> bool {
        let removed = self.inner.sessions.write().await.remove(&id);
        let Some(session) = removed else {
            return false;
        };

        if let Err(e) = session.transport.close().await {
            warn!(session_id = %id, error = %e, "Transport close failed");
        }
        let lifetime = Utc::now() - session.created_at;
        info!(
            session_id = %id,
            state = ?SessionState::Disconnected,
            lifetime_secs = lifetime.num_seconds(),
            "Session closed"
        );
        true
    }

    /// Writes a keep-alive to every `Ready` session.
    ///
    /// Works on a snapshot so sessions may come and go mid-sweep; a failure on
    /// one session never stops the sweep.
    pub async fn heartbeat_sweep(&self) -> SweepReport {
        let now = Instant::now();
        let snapshot: Vec<(SessionId, FrameSink, bool, bool)> = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.state == SessionState::Ready)
                .map(|s| {
                    (
                        s.id,
                        s.output.clone(),
                        s.reconnect.is_due(now),
                        s.reconnect.is_backing_off(),
                    )
                })
                .collect()
        };

        let mut report = SweepReport::default();
        for (id, output, due, backing_off) in snapshot {
            if !due {
                report.deferred += 1;
                continue;
            }
            match output.try_send(Frame::KeepAlive) {
                Ok(()) => {
                    report.delivered += 1;
                    if backing_off {
                        self.reset_reconnect(id).await;
                    }
                }
                Err(TransportError::Backpressure) => {
                    if self.record_backpressure(id, now).await {
                        report.deferred += 1;
                    } else {
                        report.dropped += 1;
                    }
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Heartbeat delivery failed; dropping session");
                    self.close_session(id).await;
                    report.dropped += 1;
                }
            }
        }

        if report.dropped > 0 || report.deferred > 0 {
            debug!(
                delivered = report.delivered,
                deferred = report.deferred,
                dropped = report.dropped,
                "Heartbeat sweep finished"
            );
        }
        report
    }

    async fn reset_reconnect(&self, id: SessionId) {
        if let Some(session) = self.inner.sessions.write().await.get_mut(&id) {
            session.reconnect.reset();
        }
    }

    /// Returns false when the session exhausted its attempts and was dropped.
    async fn record_backpressure(&self, id: SessionId, now: Instant) -> bool {
        let attempts = {
            let mut sessions = self.inner.sessions.write().await;
            let Some(session) = sessions.get_mut(&id) else {
                return false;
            };
            session
                .reconnect
                .record_failure(now, self.inner.config.reconnect_delay_base)
        };

        if attempts > self.inner.config.max_reconnect_attempts {
            warn!(
                session_id = %id,
                attempts,
                "Client stopped draining its stream; dropping session"
            );
            self.close_session(id).await;
            return false;
        }
        debug!(session_id = %id, attempts, "Keep-alive deferred, stream buffer full");
        true
    }

    /// Starts the periodic heartbeat. Returns false if one is already running
    /// or the manager is shutting down.
    pub fn start_heartbeat(&self) -> bool {
        if !self.is_accepting() || self.inner.heartbeat.get().is_some() {
            return false;
        }

        let task = heartbeat::spawn(self.clone(), self.inner.config.heartbeat_interval);
        if self.inner.heartbeat.set(task.abort_handle()).is_err() {
            task.abort();
            return false;
        }

        let supervisor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    supervisor
                        .report_fatal(format!("heartbeat scheduler panicked: {e}"))
                        .await;
                }
            }
        });
        true
    }

    /// Stops the heartbeat, closes every session and stops accepting new ones.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down session manager");

        if let Some(heartbeat) = self.inner.heartbeat.get() {
            heartbeat.abort();
        }

        let drained: Vec<Session> = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        let count = drained.len();

        for session in drained {
            if let Err(e) = session.transport.close().await {
                warn!(session_id = %session.id, error = %e, "Transport close failed during shutdown");
            }
        }

        self.inner.closed_tx.send_replace(true);
        info!(closed_sessions = count, "Session manager shut down");
    }

    /// Resolves once [`shutdown`](Self::shutdown) has completed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Records an unrecoverable error and shuts everything down.
    pub async fn report_fatal(&self, err: impl fmt::Display) {
        let message = err.to_string();
        error!(error = %message, "Fatal error, shutting down");
        let _ = self.inner.fatal.set(message);
        self.shutdown().await;
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.inner.fatal.get().map(String::as_str)
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let sessions = self.inner.sessions.read().await;

        let ready_count = sessions
            .values()
            .filter(|s| s.state == SessionState::Ready)
            .count();
        let connecting_count = sessions
            .values()
            .filter(|s| s.state == SessionState::Connecting)
            .count();
        let backing_off: Vec<u32> = sessions
            .values()
            .filter(|s| s.reconnect.is_backing_off())
            .map(|s| s.reconnect.attempts)
            .collect();

        HealthSnapshot {
            ready_count,
            connecting_count,
            total_count: sessions.len(),
            reconnect_state: ReconnectSummary {
                sessions_backing_off: backing_off.len(),
                pending_attempts: backing_off.iter().sum(),
                max_attempts: self.inner.config.max_reconnect_attempts,
                delay_base_ms: u64::try_from(self.inner.config.reconnect_delay_base.as_millis())
                    .unwrap_or(u64::MAX),
            },
            uptime_secs: self.inner.started_at.elapsed().as_secs(),
            accepting: self.is_accepting(),
        }
    }
}

/// Resolves the session id an inbound message names. Fails closed: there is
/// no fallback to any previously seen session.
pub fn resolve_session_id(hint: Option<&str>) -> Result<SessionId, SessionError> {
    let hint = hint
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(SessionError::MissingSessionId)?;
    hint.parse()
        .map_err(|_| SessionError::UnknownSession(hint.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use super::*;

    impl SessionManager {
        async fn session_state(&self, id: SessionId) -> Option<SessionState> {
            self.inner.sessions.read().await.get(&id).map(|s| s.state)
        }
    }

    #[derive(Default)]
    struct MockTransport {
        gate: StdMutex<Option<oneshot::Receiver<Result<(), TransportError>>>>,
        inbound: StdMutex<Vec<Bytes>>,
        inbound_error: StdMutex<Option<TransportError>>,
        closed: AtomicBool,
    }

    impl MockTransport {
        fn gated() -> (Arc<Self>, oneshot::Sender<Result<(), TransportError>>) {
            let (tx, rx) = oneshot::channel();
            let transport = Self {
                gate: StdMutex::new(Some(rx)),
                ..Default::default()
            };
            (Arc::new(transport), tx)
        }

        fn failing_inbound(err: TransportError) -> Arc<Self> {
            Arc::new(Self {
                inbound_error: StdMutex::new(Some(err)),
                ..Default::default()
            })
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionTransport for MockTransport {
        async fn start(&self, _id: SessionId, _sink: FrameSink) -> Result<(), TransportError> {
            let gate = self.gate.lock().unwrap().take();
            match gate {
                Some(rx) => rx.await.unwrap_or(Err(TransportError::Closed)),
                None => Ok(()),
            }
        }

        async fn handle_inbound(&self, raw: Bytes) -> Result<(), TransportError> {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            if let Some(err) = self.inbound_error.lock().unwrap().take() {
                return Err(err);
            }
            self.inbound.lock().unwrap().push(raw);
            Ok(())
        }

        async fn send_frame(&self, _frame: Frame) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PanickingTransport;

    #[async_trait]
    impl SessionTransport for PanickingTransport {
        async fn start(&self, _id: SessionId, _sink: FrameSink) -> Result<(), TransportError> {
            panic!("transport blew up during start");
        }

        async fn handle_inbound(&self, _raw: Bytes) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send_frame(&self, _frame: Frame) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn test_config() -> SseConfig {
        SseConfig {
            heartbeat_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 2,
            reconnect_delay_base: Duration::from_millis(100),
            buffer_size: 8,
        }
    }

    async fn open_ready(
        manager: &SessionManager,
    ) -> (SessionId, mpsc::Receiver<Frame>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::default());
        let opened = manager.open_session(None, transport.clone()).await.unwrap();
        opened.handshake.wait().await.unwrap();
        (opened.id, opened.frames, transport)
    }

    #[tokio::test]
    async fn test_session_ids_are_pairwise_distinct() {
        let manager = SessionManager::new(test_config());
        let mut ids = HashSet::new();
        let mut keep = Vec::new();
        for _ in 0..200 {
            let (id, frames, _) = open_ready(&manager).await;
            assert!(ids.insert(id));
            keep.push(frames);
        }
        assert_eq!(manager.health_snapshot().await.total_count, 200);
    }

    #[tokio::test]
    async fn test_route_to_unknown_session_fails() {
        let manager = SessionManager::new(test_config());
        let err = manager
            .route_message(SessionId::generate(), Bytes::from_static(b"ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_ping_scenario_connecting_ready_closed() {
        let manager = SessionManager::new(test_config());
        let (transport, gate) = MockTransport::gated();
        let opened = manager.open_session(None, transport.clone()).await.unwrap();
        let id = opened.id;

        let err = manager
            .route_message(id, Bytes::from_static(b"ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotReady(_)));

        gate.send(Ok(())).unwrap();
        opened.handshake.wait().await.unwrap();
        assert_eq!(manager.session_state(id).await, Some(SessionState::Ready));

        manager
            .route_message(id, Bytes::from_static(b"ping"))
            .await
            .unwrap();
        assert_eq!(transport.inbound.lock().unwrap().len(), 1);

        assert!(manager.close_session(id).await);
        let err = manager
            .route_message(id, Bytes::from_static(b"ping"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn test_ready_transition_happens_once() {
        let manager = SessionManager::new(test_config());
        let (id, _frames, _) = open_ready(&manager).await;
        assert!(!manager.mark_ready(id).await);
        assert_eq!(manager.session_state(id).await, Some(SessionState::Ready));
    }

    #[tokio::test]
    async fn test_close_session_is_idempotent() {
        let manager = SessionManager::new(test_config());
        let (id, _frames, transport) = open_ready(&manager).await;

        assert!(manager.close_session(id).await);
        assert!(!manager.close_session(id).await);
        assert!(transport.is_closed());
        assert_eq!(manager.session_state(id).await, None);
    }

    #[tokio::test]
    async fn test_close_during_handshake_prevents_ready() {
        let manager = SessionManager::new(test_config());
        let (transport, gate) = MockTransport::gated();
        let opened = manager.open_session(None, transport.clone()).await.unwrap();
        let id = opened.id;

        assert!(manager.close_session(id).await);
        gate.send(Ok(())).unwrap();

        let err = opened.handshake.wait().await.unwrap_err();
        assert!(matches!(err, SessionError::HandshakeFailed(_)));
        assert_eq!(manager.session_state(id).await, None);
        assert_eq!(manager.health_snapshot().await.ready_count, 0);
    }

    #[tokio::test]
    async fn test_handshake_failure_removes_session() {
        let manager = SessionManager::new(test_config());
        let (transport, gate) = MockTransport::gated();
        let opened = manager.open_session(None, transport.clone()).await.unwrap();

        gate.send(Err(TransportError::Handshake("refused".into())))
            .unwrap();
        let err = opened.handshake.wait().await.unwrap_err();
        assert!(matches!(err, SessionError::HandshakeFailed(_)));
        assert_eq!(manager.session_state(opened.id).await, None);
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_panicking_handshake_removes_session_and_is_fatal() {
        let manager = SessionManager::new(test_config());
        let (bystander, _frames, bystander_transport) = open_ready(&manager).await;

        let opened = manager
            .open_session(None, Arc::new(PanickingTransport))
            .await
            .unwrap();
        let err = opened.handshake.wait().await.unwrap_err();

        assert!(matches!(err, SessionError::Fatal(_)));
        assert_eq!(manager.session_state(opened.id).await, None);
        let snapshot = manager.health_snapshot().await;
        assert_eq!(snapshot.total_count, 0);
        assert_eq!(snapshot.connecting_count, 0);
        assert!(!snapshot.accepting);
        assert!(manager.fatal_error().is_some());
        assert!(bystander_transport.is_closed());
        assert_eq!(manager.session_state(bystander).await, None);
        manager.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_times_out() {
        let manager = SessionManager::new(test_config());
        let (transport, _gate) = MockTransport::gated();
        let opened = manager.open_session(None, transport).await.unwrap();

        let err = opened.handshake.wait().await.unwrap_err();
        assert!(matches!(err, SessionError::HandshakeTimedOut(5000)));
        assert_eq!(manager.session_state(opened.id).await, None);
    }

    #[tokio::test]
    async fn test_connection_lost_only_affects_one_session() {
        let manager = SessionManager::new(test_config());
        let (healthy, _healthy_frames, _) = open_ready(&manager).await;

        let broken = MockTransport::failing_inbound(TransportError::Closed);
        let opened = manager.open_session(None, broken).await.unwrap();
        opened.handshake.wait().await.unwrap();

        let err = manager
            .route_message(opened.id, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConnectionLost(_)));
        assert_eq!(manager.session_state(opened.id).await, None);
        assert_eq!(
            manager.session_state(healthy).await,
            Some(SessionState::Ready)
        );
    }

    #[tokio::test]
    async fn test_malformed_message_keeps_session() {
        let manager = SessionManager::new(test_config());
        let transport = MockTransport::failing_inbound(TransportError::Malformed("nope".into()));
        let opened = manager.open_session(None, transport).await.unwrap();
        opened.handshake.wait().await.unwrap();

        let err = manager
            .route_message(opened.id, Bytes::from_static(b"nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidMessage(_)));
        assert_eq!(
            manager.session_state(opened.id).await,
            Some(SessionState::Ready)
        );
    }

    #[tokio::test]
    async fn test_unexpected_transport_error_is_fatal() {
        let manager = SessionManager::new(test_config());
        let (bystander, _frames, bystander_transport) = open_ready(&manager).await;
        let transport = MockTransport::failing_inbound(TransportError::Internal("bug".into()));
        let opened = manager.open_session(None, transport).await.unwrap();
        opened.handshake.wait().await.unwrap();

        let err = manager
            .route_message(opened.id, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Fatal(_)));
        assert!(manager.fatal_error().is_some());
        assert!(!manager.is_accepting());
        assert_eq!(manager.session_state(bystander).await, None);
        assert!(bystander_transport.is_closed());
    }

    #[tokio::test]
    async fn test_heartbeat_failure_is_isolated() {
        let manager = SessionManager::new(test_config());
        let mut live = Vec::new();
        for _ in 0..4 {
            let (id, frames, _) = open_ready(&manager).await;
            live.push((id, frames));
        }
        let (victim, victim_frames) = live.remove(1);
        drop(victim_frames);

        let report = manager.heartbeat_sweep().await;
        assert_eq!(report.delivered, 3);
        assert_eq!(report.dropped, 1);
        assert_eq!(manager.session_state(victim).await, None);

        for (id, frames) in &mut live {
            assert_eq!(manager.session_state(*id).await, Some(SessionState::Ready));
            assert_eq!(frames.recv().await, Some(Frame::KeepAlive));
        }
    }

    #[tokio::test]
    async fn test_heartbeat_skips_connecting_sessions() {
        let manager = SessionManager::new(test_config());
        let (transport, _gate) = MockTransport::gated();
        let mut opened = manager.open_session(None, transport).await.unwrap();

        let report = manager.heartbeat_sweep().await;
        assert_eq!(report, SweepReport::default());
        assert!(opened.frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_is_dropped_after_max_attempts() {
        let config = SseConfig {
            buffer_size: 1,
            ..test_config()
        };
        let manager = SessionManager::new(config);
        let (stalled, _frames, _) = open_ready(&manager).await;

        assert_eq!(manager.heartbeat_sweep().await.delivered, 1);

        let report = manager.heartbeat_sweep().await;
        assert_eq!(report.deferred, 1);
        assert_eq!(
            manager.health_snapshot().await.reconnect_state.sessions_backing_off,
            1
        );

        // Still inside the first backoff window.
        assert_eq!(manager.heartbeat_sweep().await.deferred, 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(manager.heartbeat_sweep().await.deferred, 1);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(manager.heartbeat_sweep().await.dropped, 1);
        assert_eq!(manager.session_state(stalled).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_draining_client_resets_backoff() {
        let config = SseConfig {
            buffer_size: 1,
            ..test_config()
        };
        let manager = SessionManager::new(config);
        let (_id, mut frames, _) = open_ready(&manager).await;

        manager.heartbeat_sweep().await;
        manager.heartbeat_sweep().await;
        assert_eq!(
            manager.health_snapshot().await.reconnect_state.pending_attempts,
            1
        );

        frames.recv().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(manager.heartbeat_sweep().await.delivered, 1);
        assert_eq!(
            manager.health_snapshot().await.reconnect_state.sessions_backing_off,
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_scheduler_writes_keepalives() {
        let manager = SessionManager::new(test_config());
        let (_id, mut frames, _) = open_ready(&manager).await;

        assert!(manager.start_heartbeat());
        assert!(!manager.start_heartbeat());

        let frame = tokio::time::timeout(Duration::from_secs(31), frames.recv())
            .await
            .unwrap();
        assert_eq!(frame, Some(Frame::KeepAlive));
    }

    #[tokio::test]
    async fn test_ready_count_tracks_interleaved_open_close() {
        let manager = SessionManager::new(test_config());
        let (a, _a_frames, _) = open_ready(&manager).await;
        let (b, _b_frames, _) = open_ready(&manager).await;
        let (pending, _gate) = MockTransport::gated();
        let c = manager.open_session(None, pending).await.unwrap();

        let snapshot = manager.health_snapshot().await;
        assert_eq!(snapshot.ready_count, 2);
        assert_eq!(snapshot.connecting_count, 1);
        assert_eq!(snapshot.total_count, 3);

        manager.close_session(a).await;
        let (d, _d_frames, _) = open_ready(&manager).await;
        manager.close_session(c.id).await;
        manager.close_session(b).await;

        let snapshot = manager.health_snapshot().await;
        assert_eq!(snapshot.ready_count, 1);
        assert_eq!(snapshot.total_count, 1);
        assert_eq!(manager.session_state(d).await, Some(SessionState::Ready));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything_and_is_idempotent() {
        let manager = SessionManager::new(test_config());
        let mut transports = Vec::new();
        let mut keep = Vec::new();
        for _ in 0..3 {
            let (_id, frames, transport) = open_ready(&manager).await;
            transports.push(transport);
            keep.push(frames);
        }
        assert!(manager.start_heartbeat());

        manager.shutdown().await;
        manager.shutdown().await;
        manager.closed().await;

        let snapshot = manager.health_snapshot().await;
        assert_eq!(snapshot.total_count, 0);
        assert!(!snapshot.accepting);
        assert!(transports.iter().all(|t| t.is_closed()));

        for frames in &mut keep {
            assert_eq!(frames.recv().await, None);
        }

        let err = manager
            .open_session(None, Arc::new(MockTransport::default()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::ShuttingDown));
        assert!(manager.fatal_error().is_none());
    }

    #[test]
    fn test_resolve_session_id_fails_closed() {
        assert!(matches!(
            resolve_session_id(None),
            Err(SessionError::MissingSessionId)
        ));
        assert!(matches!(
            resolve_session_id(Some("  ")),
            Err(SessionError::MissingSessionId)
        ));
        assert!(matches!(
            resolve_session_id(Some("guess")),
            Err(SessionError::UnknownSession(_))
        ));
        let id = SessionId::generate();
        assert_eq!(resolve_session_id(Some(&id.to_string())).unwrap(), id);
    }
}
