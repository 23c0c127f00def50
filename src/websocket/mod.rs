//! WebSocket transport: wire envelope, upgrade handler, and per-connection session loop.

mod handler;
mod message;
mod session;

pub use handler::{is_valid_client_id, ws_handler, WsQuery};
pub use message::{ClientMessage, OutboundMessage, ServerMessage};
pub use session::{CloseReason, Session, SessionError, SessionState};
