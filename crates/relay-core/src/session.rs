//! Identity snapshot of a client session.

use std::collections::BTreeMap;

/// Attribute map carried by sessions and envelopes.
///
/// Ordered so that encoded envelopes are deterministic.
pub type Attributes = BTreeMap<String, String>;

/// Attributes captured once when a client session is established.
///
/// Built by the upgrade layer (route path, generated identifier, route
/// parameters) and never mutated afterwards; the relay only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAttributes {
    route: String,
    attributes: Attributes,
}

impl SessionAttributes {
    /// Create a snapshot with just a route.
    #[must_use]
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            attributes: Attributes::new(),
        }
    }

    /// Create a snapshot with attributes.
    #[must_use]
    pub fn with_attributes(route: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            route: route.into(),
            attributes,
        }
    }

    /// Add an attribute while the snapshot is still being built.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Route (request path) the session was opened on.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Get an attribute value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the snapshot carries no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}
