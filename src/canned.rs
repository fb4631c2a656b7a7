//! Canned responses
//!
//! A canned response is a pre-authored reply template with `{{variable}}`
//! fields, a set of *signals* (paraphrases used for retrieval), and tags.
//! Templates tagged [`crate::event::PREAMBLE_TAG`] are preamble candidates.
//! Rendering goes through minijinja; field discovery parses the template's
//! `{{...}}` variables so the composer can tell up front which values it has
//! to resolve.

use crate::error::EngineError;
use crate::types::CannedResponseId;
use chrono::{DateTime, Utc};
use minijinja::Environment;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// A pre-authored reply template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CannedResponse {
    pub id: CannedResponseId,
    /// Jinja-style template text
    pub template: String,
    /// Paraphrases used for retrieval ranking
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl CannedResponse {
    /// Create a canned response from a template
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            id: CannedResponseId::new(),
            template: template.into(),
            signals: Vec::new(),
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Set retrieval signals
    pub fn with_signals(mut self, signals: Vec<String>) -> Self {
        self.signals = signals;
        self
    }

    /// Set tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Whether the template carries the given tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Field names referenced by the template, in order of appearance
    pub fn fields(&self) -> Vec<String> {
        template_fields(&self.template)
    }

    /// Texts considered during retrieval ranking
    pub fn retrieval_texts(&self) -> Vec<String> {
        let mut texts = vec![self.template.clone()];
        texts.extend(self.signals.iter().cloned());
        texts
    }
}

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*\}\}")
            .expect("field pattern is valid")
    })
}

/// Parse the `{{...}}` variables of a template, deduplicated, in order
pub fn template_fields(template: &str) -> Vec<String> {
    let mut fields = Vec::new();
    for capture in field_pattern().captures_iter(template) {
        let name = capture[1].to_string();
        if !fields.contains(&name) {
            fields.push(name);
        }
    }
    fields
}

/// Render a template with dotted field names resolved against nested maps.
///
/// `values` is keyed by the full dotted path (e.g. `std.customer.name`); the
/// renderer expands the paths into the nested context minijinja expects.
pub fn render_template(
    template: &str,
    values: &HashMap<String, serde_json::Value>,
) -> Result<String, EngineError> {
    let mut context = serde_json::Map::new();
    for (path, value) in values {
        insert_path(&mut context, path, value.clone());
    }

    let env = Environment::new();
    env.render_str(template, serde_json::Value::Object(context))
        .map_err(|e| EngineError::Template(e.to_string()))
}

fn insert_path(map: &mut serde_json::Map<String, serde_json::Value>, path: &str, value: serde_json::Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if !entry.is_object() {
                *entry = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(nested) = entry {
                insert_path(nested, rest, value);
            }
        }
    }
}
