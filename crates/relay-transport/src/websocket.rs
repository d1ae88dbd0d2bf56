//! WebSocket upgrade handler for client sessions.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        OriginalUri, Path, State, WebSocketUpgrade,
        rejection::PathRejection,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use relay_core::SessionAttributes;
use uuid::Uuid;

use crate::{hub::SessionHub, relay::Relay};

/// Attribute holding the generated session identifier.
pub const UUID_KEY: &str = "uuid";

/// WebSocket handler state.
#[derive(Clone)]
pub struct RelayState {
    /// Open client sessions.
    pub hub: Arc<SessionHub>,
    /// Relay the sessions talk through.
    pub relay: Arc<Relay>,
}

impl RelayState {
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(hub: Arc<SessionHub>, relay: Arc<Relay>) -> Self {
        Self { hub, relay }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    params: Result<Path<HashMap<String, String>>, PathRejection>,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    let params = params.map(|Path(params)| params).unwrap_or_default();
    let attributes = session_attributes(uri.path(), params);
    ws.on_upgrade(|socket| handle_socket(socket, state, attributes))
}

/// Build the attribute snapshot of a new session.
///
/// Holds a fresh `uuid` plus every route parameter, keyed by its
/// title-cased name.
#[must_use]
pub fn session_attributes(route: &str, params: HashMap<String, String>) -> SessionAttributes {
    params.into_iter().fold(
        SessionAttributes::new(route).attribute(UUID_KEY, Uuid::new_v4().to_string()),
        |session, (key, value)| session.attribute(title_case(&key), value),
    )
}

/// Upper-case the first letter of every word.
fn title_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut word_start = true;
    for c in key.chars() {
        if word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        word_start = !(c.is_alphanumeric() || c == '_');
    }
    out
}

async fn handle_socket(socket: WebSocket, state: RelayState, attributes: SessionAttributes) {
    let session = state.hub.register(attributes);
    let (mut sender, mut receiver) = socket.split();
    let mut outbound = session.outbound;

    // Spawn task to forward relayed payloads to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            let msg = match std::str::from_utf8(&payload) {
                Ok(text) => Message::Text(text.to_owned().into()),
                Err(_) => Message::Binary(payload),
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let payload = match msg {
            Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(session = %session.id, "WebSocket error: {e}");
                break;
            }
        };

        // Errors are logged by the relay; the session stays open.
        let _ = state.relay.forward(&session.attributes, payload).await;
    }

    send_task.abort();
    state.hub.unregister(session.id);
}

/// Create the WebSocket router for one relay endpoint.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router("/ws/{room}", state));
/// ```
#[must_use]
pub fn create_ws_router(endpoint: &str, state: RelayState) -> axum::Router {
    axum::Router::new()
        .route(endpoint, axum::routing::get(ws_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("room"), "Room");
        assert_eq!(title_case("game-id"), "Game-Id");
        assert_eq!(title_case("room_id"), "Room_id");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_session_attributes() {
        let params = HashMap::from([
            ("room".to_string(), "lobby".to_string()),
            ("player".to_string(), "7".to_string()),
        ]);
        let session = session_attributes("/ws/lobby/7", params);

        assert_eq!(session.route(), "/ws/lobby/7");
        assert_eq!(session.len(), 3);
        assert_eq!(session.get("Room"), Some("lobby"));
        assert_eq!(session.get("Player"), Some("7"));
        assert!(session.get(UUID_KEY).is_some_and(|id| Uuid::parse_str(id).is_ok()));
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let a = session_attributes("/ws", HashMap::new());
        let b = session_attributes("/ws", HashMap::new());
        assert_ne!(a.get(UUID_KEY), b.get(UUID_KEY));
    }
}
