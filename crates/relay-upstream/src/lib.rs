//! Shared upstream connection for the relay.
//!
//! Provides:
//! - `UpstreamConnection` - One physical connection guarded by the introduction handshake
//! - `UpstreamClient` - Reconnecting writer plus background read loop
//! - `Socket`/`Dialer` - Transport seam
//! - WebSocket dialer (feature: websocket)

pub mod client;
pub mod connection;
pub mod socket;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{DEFAULT_READ_BUFFER, UpstreamClient};
pub use connection::{
    CLIENT_INTRODUCTION, CLIENT_INTRODUCTION_ACK, UpstreamConnection, UpstreamError,
};
pub use socket::{Dialer, Socket};

#[cfg(feature = "websocket")]
pub use websocket::WsDialer;
