use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures of the connection manager, keyed by how the acceptor must answer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Handshake timed out after {0}ms")]
    HandshakeTimedOut(u128),

    #[error("Missing session id")]
    MissingSessionId,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session not ready: {0}")]
    NotReady(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Session(err) => {
                let (status, code) = match err {
                    SessionError::HandshakeFailed(_) | SessionError::HandshakeTimedOut(_) => {
                        tracing::warn!("Session handshake failed: {err}");
                        (StatusCode::BAD_GATEWAY, "HANDSHAKE_FAILED")
                    }
                    SessionError::MissingSessionId => {
                        (StatusCode::BAD_REQUEST, "MISSING_SESSION_ID")
                    }
                    SessionError::UnknownSession(_) => (StatusCode::NOT_FOUND, "UNKNOWN_SESSION"),
                    SessionError::NotReady(_) => (StatusCode::CONFLICT, "NOT_READY"),
                    SessionError::ConnectionLost(_) => (StatusCode::GONE, "CONNECTION_LOST"),
                    SessionError::InvalidMessage(_) => (StatusCode::BAD_REQUEST, "INVALID_MESSAGE"),
                    SessionError::ShuttingDown => {
                        (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN")
                    }
                    SessionError::Fatal(_) => {
                        tracing::error!("Fatal session error: {err}");
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                };
                let message = match err {
                    SessionError::Fatal(_) => "An internal server error occurred".to_string(),
                    other => other.to_string(),
                };
                (status, code, message)
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: SessionError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_session_errors_map_to_client_and_server_statuses() {
        assert_eq!(status_of(SessionError::MissingSessionId), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(SessionError::UnknownSession("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(SessionError::NotReady("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(SessionError::ConnectionLost("x".into())),
            StatusCode::GONE
        );
        assert_eq!(
            status_of(SessionError::HandshakeTimedOut(10)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(SessionError::ShuttingDown),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(SessionError::Fatal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
