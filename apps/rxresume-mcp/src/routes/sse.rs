use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{sse::Event, IntoResponse, Sse},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::errors::AppError;
use crate::mcp::McpTransport;
use crate::sse::{resolve_session_id, Frame, OpenedSession, SessionId, SessionManager};
use crate::state::AppState;

pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId", alias = "session_id")]
    pub session_id: Option<String>,
}

/// GET /sse
/// Opens a session and streams its events until either side closes it.
pub async fn open_stream(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Result<impl IntoResponse, AppError> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let config = state.manager.config();
    let transport = Arc::new(McpTransport::new(
        state.mcp.clone(),
        config.reconnect_delay_base,
        config.buffer_size,
    ));

    let OpenedSession {
        id,
        frames,
        handshake,
    } = state.manager.open_session(peer, transport).await?;
    // Armed before the handshake so a client that leaves mid-handshake is
    // still cleaned up.
    let guard = CloseOnDrop {
        manager: state.manager.clone(),
        id,
    };
    handshake.wait().await?;

    let stream = SessionStream {
        frames: ReceiverStream::new(frames),
        _guard: guard,
    };

    Ok(([(SESSION_HEADER, id.to_string())], Sse::new(stream)))
}

/// POST /messages?sessionId=<id>
pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let id = resolve_session_id(session_hint(&query, &headers))?;
    state.manager.route_message(id, body).await?;
    Ok(StatusCode::ACCEPTED)
}

/// DELETE /messages?sessionId=<id>
pub async fn close_stream(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let id = resolve_session_id(session_hint(&query, &headers))?;
    if state.manager.close_session(id).await {
        debug!(session_id = %id, "Session closed by client request");
    }
    Ok(StatusCode::NO_CONTENT)
}

fn session_hint<'a>(query: &'a SessionQuery, headers: &'a HeaderMap) -> Option<&'a str> {
    query
        .session_id
        .as_deref()
        .or_else(|| headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()))
}

fn to_event(frame: Frame) -> Event {
    match frame {
        Frame::Event { event, data, retry } => {
            let event = Event::default().event(event).data(data);
            match retry {
                Some(retry) => event.retry(retry),
                None => event,
            }
        }
        Frame::KeepAlive => Event::default().comment("keepalive"),
    }
}

/// Event stream of one session. Dropping it (client went away) closes the
/// session.
struct SessionStream {
    frames: ReceiverStream<Frame>,
    _guard: CloseOnDrop,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames
            .poll_next_unpin(cx)
            .map(|frame| frame.map(|frame| Ok(to_event(frame))))
    }
}

struct CloseOnDrop {
    manager: SessionManager,
    id: SessionId,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let manager = self.manager.clone();
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if manager.close_session(id).await {
                    debug!(session_id = %id, "Client disconnected");
                }
            });
        }
    }
}
