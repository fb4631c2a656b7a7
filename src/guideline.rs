//! Behavioral guidelines
//!
//! A guideline pairs a natural-language condition ("the customer asks about
//! pricing") with an optional natural-language action ("offer the standard
//! plan first"). Whether a guideline applies in a given turn is decided by
//! the guideline matcher, not by lexical pattern matching. A guideline with
//! an empty action is *observational*; otherwise it is *actionable*.

use crate::types::{EdgeId, GuidelineId, JourneyId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Condition/action pair of a guideline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineContent {
    /// When the guideline applies, in natural language
    pub condition: String,
    /// What to do when it applies; `None` for observational rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl GuidelineContent {
    /// Actionable content
    pub fn new(condition: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            action: Some(action.into()),
        }
    }

    /// Observational content (no action)
    pub fn observational(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            action: None,
        }
    }
}

/// Back-reference from a projected guideline to its journey node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyNodeRef {
    pub journey_id: JourneyId,
    pub node_id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<EdgeId>,
}

/// Engine-relevant flags attached to a guideline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuidelineMetadata {
    /// Re-evaluated every turn regardless of prior application
    #[serde(default)]
    pub continuous: bool,
    /// The action's data depends on what the customer says this turn, so a
    /// previously applied guideline may still need a fresh evaluation
    #[serde(default)]
    pub customer_dependent_action_data: bool,
    /// Set on guidelines projected from journey graphs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journey_node: Option<JourneyNodeRef>,
    /// Guidelines this observational rule disambiguates between
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disambiguation_targets: Vec<GuidelineId>,
}

/// A behavioral rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guideline {
    pub id: GuidelineId,
    pub content: GuidelineContent,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: GuidelineMetadata,
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Guideline {
    /// Create an enabled guideline with the given content
    pub fn new(content: GuidelineContent) -> Self {
        Self {
            id: GuidelineId::new(),
            content,
            enabled: true,
            tags: Vec::new(),
            metadata: GuidelineMetadata::default(),
            created_at: Utc::now(),
        }
    }

    /// Set tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: GuidelineMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Mark as continuous
    pub fn continuous(mut self) -> Self {
        self.metadata.continuous = true;
        self
    }

    /// Whether the guideline carries no action
    pub fn is_observational(&self) -> bool {
        match &self.content.action {
            None => true,
            Some(action) => action.trim().is_empty(),
        }
    }

    /// Whether the guideline was projected from a journey node
    pub fn is_journey_node(&self) -> bool {
        self.metadata.journey_node.is_some()
    }

    /// Whether this observational rule heads a disambiguation group
    pub fn is_disambiguation_head(&self) -> bool {
        !self.metadata.disambiguation_targets.is_empty()
    }
}

/// The matcher's positive decision that a guideline applies this turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineMatch {
    pub guideline: Guideline,
    /// Confidence in `[0, 1]`
    pub score: f32,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl GuidelineMatch {
    /// Match with full confidence and a rationale
    pub fn new(guideline: Guideline, score: f32, rationale: impl Into<String>) -> Self {
        Self {
            guideline,
            score: score.clamp(0.0, 1.0),
            rationale: rationale.into(),
            metadata: HashMap::new(),
        }
    }

    /// The journey this match belongs to, when it is a journey-node match
    pub fn journey_id(&self) -> Option<JourneyId> {
        self.guideline
            .metadata
            .journey_node
            .as_ref()
            .map(|node| node.journey_id)
    }
}
