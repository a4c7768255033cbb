//! Server-Sent Events connection manager.
//!
//! Tracks every open event stream, binds it to a protocol transport, keeps it
//! alive with periodic comment frames and tears it down on close, error or
//! shutdown.

pub mod heartbeat;
pub mod manager;
pub mod session;
pub mod transport;

pub use manager::{resolve_session_id, HealthSnapshot, OpenedSession, SessionManager};
pub use session::{Frame, FrameSink, SessionId};
pub use transport::{SessionTransport, TransportError};
