//! Wire envelope exchanged with the upstream backend (JSON + base64).

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::session::{Attributes, SessionAttributes};

/// Envelope error.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One logical message crossing the relay boundary.
///
/// Going upstream, `route` and `attributes` identify the originating
/// session so the backend can address a reply. Coming back, they restrict
/// which sessions receive `payload`; both empty means every session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Route the message belongs to.
    #[serde(
        rename = "url",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub route: String,

    /// Session attributes the message is addressed to.
    #[serde(
        rename = "session",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Attributes::is_empty"
    )]
    pub attributes: Attributes,

    /// Opaque payload (base64 on the wire).
    #[serde(rename = "body", default, with = "base64_body")]
    pub payload: Bytes,
}

impl Envelope {
    /// Create an envelope.
    #[must_use]
    pub fn new(
        route: impl Into<String>,
        attributes: Attributes,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            route: route.into(),
            attributes,
            payload: payload.into(),
        }
    }

    /// Create an unaddressed envelope, delivered to every session.
    #[must_use]
    pub fn broadcast(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Create an envelope tagged with a session's identity.
    #[must_use]
    pub fn from_session(session: &SessionAttributes, payload: impl Into<Bytes>) -> Self {
        Self::new(session.route(), session.attributes().clone(), payload)
    }

    /// Whether the envelope carries no routing constraints.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.route.is_empty() && self.attributes.is_empty()
    }

    /// Encode to the wire representation.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    /// Decode from the wire representation.
    ///
    /// Field names match case-insensitively, an exact match taking
    /// precedence. A missing or `null` field takes its default, and a `null`
    /// document is an empty envelope. Unknown fields are ignored.
    ///
    /// # Errors
    /// Returns [`EnvelopeError::Malformed`] if the bytes are not a JSON
    /// object with the expected field types.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(bytes).map_err(EnvelopeError::Malformed)?;
        let value = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(fields) => Value::Object(wire_fields(fields)),
            other => other,
        };
        serde_json::from_value(value).map_err(EnvelopeError::Malformed)
    }
}

const WIRE_FIELDS: [&str; 3] = ["url", "session", "body"];

/// Rename fields matching a wire name in another case to that name.
fn wire_fields(fields: Map<String, Value>) -> Map<String, Value> {
    let mut folded = Map::new();
    let mut exact = Vec::new();
    for (key, value) in fields {
        match WIRE_FIELDS.iter().find(|name| name.eq_ignore_ascii_case(&key)) {
            Some(name) if *name == key => exact.push((key, value)),
            Some(name) => {
                folded.insert((*name).to_string(), value);
            }
            None => {
                folded.insert(key, value);
            }
        }
    }
    folded.extend(exact);
    folded
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_body {
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    use super::BASE64;

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => BASE64
                .decode(encoded)
                .map(Bytes::from)
                .map_err(D::Error::custom),
            None => Ok(Bytes::new()),
        }
    }
}
