//! Relay configuration resolved from endpoint definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Key under an endpoint's `extra_config` that enables the relay.
pub const NAMESPACE: &str = "github.com/ProvablyFair/krakend/websocket";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Endpoint {0} has a backend without hosts")]
    MissingHost(String),
    #[error("Invalid backend host {host}: {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },
}

/// Backend of an endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Candidate hosts; only the first one is used by the relay.
    #[serde(default)]
    pub host: Vec<String>,
    /// Path appended to the host.
    #[serde(default)]
    pub url_pattern: String,
}

/// Endpoint definition as produced by the routing layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Public path pattern, e.g. `/ws/{room}`.
    pub endpoint: String,
    /// Backends serving the endpoint.
    #[serde(default)]
    pub backend: Vec<BackendConfig>,
    /// Namespaced component settings.
    #[serde(default)]
    pub extra_config: Map<String, Value>,
}

/// Resolved upstream address of one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// WebSocket URL of the backend.
    pub upstream_url: String,
    /// Origin label sent when dialing the backend.
    pub origin: String,
}

impl RelayConfig {
    /// Create a relay configuration.
    #[must_use]
    pub fn new(upstream_url: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            origin: origin.into(),
        }
    }

    /// Resolve the relay configuration of an endpoint.
    ///
    /// Returns `Ok(None)` when the endpoint does not opt into the relay or
    /// does not have exactly one backend; such endpoints are served without
    /// a relay.
    ///
    /// # Errors
    /// Returns error if the backend has no host or the host is not a URL.
    pub fn from_endpoint(endpoint: &EndpointConfig) -> Result<Option<Self>, ConfigError> {
        let [backend] = endpoint.backend.as_slice() else {
            return Ok(None);
        };
        if !endpoint.extra_config.contains_key(NAMESPACE) {
            return Ok(None);
        }

        let host = backend
            .host
            .first()
            .ok_or_else(|| ConfigError::MissingHost(endpoint.endpoint.clone()))?;
        let mut url = Url::parse(host).map_err(|source| ConfigError::InvalidHost {
            host: host.clone(),
            source,
        })?;
        let path = join_path(url.path(), &backend.url_pattern);
        url.set_path(&path);

        Ok(Some(Self::new(url, endpoint.endpoint.clone())))
    }
}

/// Join two URL paths, collapsing empty and `.` segments.
fn join_path(base: &str, pattern: &str) -> String {
    let segments: Vec<&str> = base
        .split('/')
        .chain(pattern.split('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", segments.join("/"))
}
