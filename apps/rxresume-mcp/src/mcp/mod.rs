//! Model Context Protocol over SSE: JSON-RPC dispatch and the session
//! transport bound to each event stream.

pub mod handler;
pub mod protocol;
pub mod transport;

pub use handler::McpHandler;
pub use transport::{McpTransport, MESSAGES_PATH};
