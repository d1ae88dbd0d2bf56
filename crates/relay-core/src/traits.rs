//! Core traits for session delivery and upstream responses.

use async_trait::async_trait;
use bytes::Bytes;

use crate::SessionAttributes;

/// Predicate selecting sessions by their attribute snapshot.
pub type SessionPredicate<'a> = &'a dyn Fn(&SessionAttributes) -> bool;

/// Registry of open client sessions.
///
/// Implementations must tolerate sessions being added and removed while a
/// delivery is in progress, and must not let one session's failed write
/// affect delivery to the others.
pub trait SessionRegistry: Send + Sync {
    /// Write `payload` to every open session matching `predicate`.
    ///
    /// Returns the number of sessions the payload was handed to.
    fn broadcast_filter(&self, payload: &Bytes, predicate: SessionPredicate<'_>) -> usize;

    /// Write `payload` to every open session.
    fn broadcast(&self, payload: &Bytes) -> usize {
        self.broadcast_filter(payload, &|_| true)
    }

    /// Visit the attribute snapshot of every open session.
    fn for_each_session(&self, f: &mut dyn FnMut(&SessionAttributes));

    /// Number of open sessions.
    fn len(&self) -> usize;

    /// Whether no session is open.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiver of raw frames read from the upstream connection.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// Handle one frame exactly as it was read.
    async fn on_response(&self, frame: &[u8]);
}
