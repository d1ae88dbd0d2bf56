//! Client-facing transport for the relay.
//!
//! Provides:
//! - `SessionHub` - In-memory registry of open client sessions
//! - `Relay` - Glue between client sessions and the upstream client
//! - WebSocket upgrade handler (feature: websocket)

pub mod hub;
pub mod relay;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use hub::{SessionHandle, SessionHub, SessionId};
pub use relay::{Relay, RelayError};

#[cfg(feature = "websocket")]
pub use websocket::{RelayState, create_ws_router};
