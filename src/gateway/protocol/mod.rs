//! Gateway Protocol - Control API bodies and the event channel
//!
//! ## Event channel
//!
//! - **JSON text frames** over WebSocket
//! - Client messages carry an `action` and a `sessionId`
//! - Server messages carry an `event` and a `sessionId`
//! - Malformed client messages get `{"error": "Invalid message format"}`
//!
//! ## Control API
//!
//! Plain JSON request/response bodies, see [`types`].

pub mod schema;
pub mod types;

pub use schema::{
    protocol_version, ClientMessage, ErrorMessage, ServerMessage, INVALID_MESSAGE_FORMAT,
    PROTOCOL_VERSION,
};
pub use types::*;
