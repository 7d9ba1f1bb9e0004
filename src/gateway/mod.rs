//! Gateway module - Control API and real-time event channel
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  toolrun-gateway                     │
//! │     HTTP /api/v1/*          WebSocket /ws            │
//! └───────────────┬─────────────────────┬───────────────┘
//!                 │                     │
//!                 ▼                     ▼
//!          ┌─────────────┐      ┌────────────────┐
//!          │ Orchestrator│─────▶│EventBroadcaster│
//!          └─────────────┘      └────────────────┘
//! ```

pub mod broadcaster;
pub mod protocol;
pub mod server;

pub use broadcaster::{
    EventBroadcaster, EventHandler, SessionEvent, SubscriptionHandle, MAX_PENDING_LOGS,
};
pub use protocol::{ClientMessage, ErrorMessage, ServerMessage, PROTOCOL_VERSION};
pub use server::{build_router, AppError, GatewayState};
