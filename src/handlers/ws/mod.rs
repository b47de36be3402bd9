//! Realtime session updates over WebSocket.

mod handler;
pub mod messages;
pub mod protocol;

pub use handler::ws_handler;
pub use messages::{ClientMessage, ServerMessage};
