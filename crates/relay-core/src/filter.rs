//! Attribute-based demultiplexing of backend replies.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{Envelope, ResponseHandler, SessionAttributes, SessionRegistry};

/// Whether `session` qualifies for delivery of `envelope`.
///
/// The route must match when the envelope names one, and every envelope
/// attribute must be present in the session with an equal value. Session
/// attributes the envelope does not mention are irrelevant.
#[must_use]
pub fn matches(envelope: &Envelope, session: &SessionAttributes) -> bool {
    if !envelope.route.is_empty() && envelope.route != session.route() {
        return false;
    }
    // A session can never satisfy more constraints than it has attributes.
    if envelope.attributes.len() > session.len() {
        return false;
    }
    envelope
        .attributes
        .iter()
        .all(|(key, expected)| session.get(key) == Some(expected.as_str()))
}

/// Outcome of dispatching one backend frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Frame decoded as an envelope; payload went to matching sessions.
    Routed(usize),
    /// Frame was not an envelope; raw bytes went to every session.
    Fallback(usize),
}

impl Dispatch {
    /// Number of sessions the payload was handed to.
    #[must_use]
    pub const fn delivered(self) -> usize {
        match self {
            Self::Routed(n) | Self::Fallback(n) => n,
        }
    }
}

/// Routes backend frames to the sessions they are addressed to.
pub struct Demultiplexer<R: ?Sized> {
    registry: Arc<R>,
}

impl<R> Demultiplexer<R>
where
    R: SessionRegistry + ?Sized,
{
    /// Create a demultiplexer delivering through `registry`.
    #[must_use]
    pub const fn new(registry: Arc<R>) -> Self {
        Self { registry }
    }

    /// Decode `frame` and deliver it.
    ///
    /// Frames that are not envelopes are broadcast as-is rather than
    /// dropped.
    pub fn dispatch(&self, frame: &[u8]) -> Dispatch {
        match Envelope::decode(frame) {
            Ok(envelope) => {
                let delivered = self
                    .registry
                    .broadcast_filter(&envelope.payload, &|session| matches(&envelope, session));
                tracing::trace!(
                    route = %envelope.route,
                    broadcast = envelope.is_broadcast(),
                    delivered,
                    "Routed backend message"
                );
                Dispatch::Routed(delivered)
            }
            Err(e) => {
                tracing::debug!("Backend sent a message without an envelope: {e}");
                Dispatch::Fallback(self.registry.broadcast(&Bytes::copy_from_slice(frame)))
            }
        }
    }
}

#[async_trait]
impl<R> ResponseHandler for Demultiplexer<R>
where
    R: SessionRegistry + ?Sized,
{
    async fn on_response(&self, frame: &[u8]) {
        self.dispatch(frame);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::Attributes;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn session() -> SessionAttributes {
        SessionAttributes::with_attributes("p", attrs(&[("a", "1"), ("b", "2")]))
    }

    #[test]
    fn test_matches_subset_on_same_route() {
        let envelope = Envelope::new("p", attrs(&[("a", "1")]), Bytes::new());
        assert!(matches(&envelope, &session()));
    }

    #[test]
    fn test_rejects_route_mismatch() {
        let envelope = Envelope::new("q", attrs(&[("a", "1")]), Bytes::new());
        assert!(!matches(&envelope, &session()));
    }

    #[test]
    fn test_rejects_missing_attribute() {
        let envelope = Envelope::new("", attrs(&[("a", "1"), ("c", "3")]), Bytes::new());
        assert!(!matches(&envelope, &session()));
    }

    #[test]
    fn test_rejects_different_value() {
        let envelope = Envelope::new("", attrs(&[("b", "3")]), Bytes::new());
        assert!(!matches(&envelope, &session()));
    }

    #[test]
    fn test_rejects_more_constraints_than_attributes() {
        let envelope = Envelope::new(
            "",
            attrs(&[("a", "1"), ("b", "2"), ("c", "3")]),
            Bytes::new(),
        );
        assert!(!matches(&envelope, &session()));
    }

    #[test]
    fn test_empty_envelope_matches_everything() {
        let envelope = Envelope::broadcast(Bytes::new());
        assert!(matches(&envelope, &session()));
        assert!(matches(&envelope, &SessionAttributes::default()));
    }

    /// Registry double recording what each session received.
    struct Recorder {
        sessions: Vec<SessionAttributes>,
        received: Mutex<Vec<(usize, Bytes)>>,
    }

    impl Recorder {
        fn new(sessions: Vec<SessionAttributes>) -> Arc<Self> {
            Arc::new(Self {
                sessions,
                received: Mutex::new(Vec::new()),
            })
        }

        fn received(&self) -> Vec<(usize, Bytes)> {
            self.received.lock().unwrap().clone()
        }
    }

    impl SessionRegistry for Recorder {
        fn broadcast_filter(
            &self,
            payload: &Bytes,
            predicate: crate::SessionPredicate<'_>,
        ) -> usize {
            let mut received = self.received.lock().unwrap();
            let mut delivered = 0;
            for (idx, session) in self.sessions.iter().enumerate() {
                if predicate(session) {
                    received.push((idx, payload.clone()));
                    delivered += 1;
                }
            }
            delivered
        }

        fn for_each_session(&self, f: &mut dyn FnMut(&SessionAttributes)) {
            self.sessions.iter().for_each(f);
        }

        fn len(&self) -> usize {
            self.sessions.len()
        }
    }

    fn lobby() -> Vec<SessionAttributes> {
        vec![
            SessionAttributes::new("/ws/lobby").attribute("uuid", "1"),
            SessionAttributes::new("/ws/lobby").attribute("uuid", "2"),
            SessionAttributes::new("/ws/game").attribute("uuid", "3"),
        ]
    }

    #[test]
    fn test_dispatch_routes_to_matching_sessions() {
        let registry = Recorder::new(lobby());
        let demux = Demultiplexer::new(Arc::clone(&registry));

        let frame = br#"{"url":"/ws/lobby","session":{"uuid":"2"},"body":"aGk="}"#;
        assert_eq!(demux.dispatch(frame), Dispatch::Routed(1));
        assert_eq!(registry.received(), vec![(1, Bytes::from_static(b"hi"))]);
    }

    #[test]
    fn test_dispatch_route_only_reaches_whole_route() {
        let registry = Recorder::new(lobby());
        let demux = Demultiplexer::new(Arc::clone(&registry));

        let frame = br#"{"url":"/ws/lobby","body":"aGk="}"#;
        assert_eq!(demux.dispatch(frame), Dispatch::Routed(2));
    }

    #[test]
    fn test_dispatch_falls_back_to_raw_broadcast() {
        let registry = Recorder::new(lobby());
        let demux = Demultiplexer::new(Arc::clone(&registry));

        let result = demux.dispatch(b"not an envelope");
        assert_eq!(result, Dispatch::Fallback(registry.len()));

        let received = registry.received();
        assert_eq!(received.len(), 3);
        assert!(received.iter().all(|(_, p)| p == &b"not an envelope"[..]));
    }

    #[test]
    fn test_response_handler_dispatches() {
        let registry = Recorder::new(lobby());
        let handler: Arc<dyn ResponseHandler> =
            Arc::new(Demultiplexer::new(Arc::clone(&registry)));

        tokio_test::block_on(handler.on_response(br#"{"body":"eA=="}"#));
        assert_eq!(registry.received().len(), 3);
    }
}
