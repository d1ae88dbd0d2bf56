//! Core abstractions for the WebSocket relay.
//!
//! This crate provides the fundamental building blocks:
//! - `Envelope` - Wire envelope (JSON + base64) exchanged with the backend
//! - `SessionAttributes` - Immutable identity snapshot of a client session
//! - `Demultiplexer` - Attribute-based delivery of backend replies
//! - `RelayConfig` - Upstream address resolved from an endpoint definition
//! - Session registry and response handler traits

pub mod config;
pub mod envelope;
pub mod filter;
pub mod session;
pub mod traits;

pub use config::{ConfigError, EndpointConfig, RelayConfig};
pub use envelope::{Envelope, EnvelopeError};
pub use filter::{Demultiplexer, Dispatch, matches};
pub use session::{Attributes, SessionAttributes};
pub use traits::{ResponseHandler, SessionPredicate, SessionRegistry};
