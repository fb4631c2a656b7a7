//! Correlation scopes for event attribution
//!
//! Every event emitted during one logical request carries a hierarchical
//! correlation id such as `RA1B2C3D4::process::generate_message`. A scope is
//! an immutable value: pushing a label produces a child scope and leaves the
//! parent untouched, so nested async operations can carry their own scope
//! without any task-local storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator between scope segments
const SCOPE_SEPARATOR: &str = "::";

/// A hierarchical correlation scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationScope(String);

impl CorrelationScope {
    /// Create a fresh root scope (`R<id>`)
    pub fn root() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(format!("R{}", &id[..8]))
    }

    /// Create a root scope with an explicit id (used by tests and callers
    /// that already minted a request id)
    pub fn root_with_id(id: impl Into<String>) -> Self {
        Self(format!("R{}", id.into()))
    }

    /// Derive a child scope by appending a label
    pub fn push(&self, label: &str) -> Self {
        Self(format!("{}{}{}", self.0, SCOPE_SEPARATOR, label))
    }

    /// Whether `self` descends from `ancestor` (or equals it)
    pub fn descends_from(&self, ancestor: &CorrelationScope) -> bool {
        self.0 == ancestor.0
            || self
                .0
                .starts_with(&format!("{}{}", ancestor.0, SCOPE_SEPARATOR))
    }

    /// Get the scope value recorded on events
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CorrelationScope {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
