//! In-memory registry of open client sessions.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use bytes::Bytes;
use relay_core::{SessionAttributes, SessionPredicate, SessionRegistry};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

struct Entry {
    attributes: Arc<SessionAttributes>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

/// Registered session, owned by the connection task.
pub struct SessionHandle {
    /// Unique session identifier.
    pub id: SessionId,
    /// Immutable attribute snapshot.
    pub attributes: Arc<SessionAttributes>,
    /// Payloads to write to the client.
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
}

/// Registry keeping one outbound queue per open session.
///
/// Writes never block; each session's queue is drained by its own
/// connection task.
#[derive(Default)]
pub struct SessionHub {
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl SessionHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with its attribute snapshot.
    #[must_use]
    pub fn register(&self, attributes: SessionAttributes) -> SessionHandle {
        let id = Uuid::new_v4();
        let attributes = Arc::new(attributes);
        let (outbound_tx, outbound) = mpsc::unbounded_channel();

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Entry {
                    attributes: Arc::clone(&attributes),
                    outbound: outbound_tx,
                },
            );
        tracing::debug!(session = %id, route = attributes.route(), "Session opened");

        SessionHandle {
            id,
            attributes,
            outbound,
        }
    }

    /// Remove a session.
    pub fn unregister(&self, id: SessionId) {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            tracing::debug!(session = %id, "Session closed");
        }
    }
}

impl SessionRegistry for SessionHub {
    fn broadcast_filter(&self, payload: &Bytes, predicate: SessionPredicate<'_>) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        for (id, entry) in sessions.iter() {
            if !predicate(&entry.attributes) {
                continue;
            }
            if entry.outbound.send(payload.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(session = %id, "Skipping closed session");
            }
        }
        delivered
    }

    fn for_each_session(&self, f: &mut dyn FnMut(&SessionAttributes)) {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        for entry in sessions.values() {
            f(&entry.attributes);
        }
    }

    fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
