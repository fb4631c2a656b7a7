//! Agent and customer identities
//!
//! An agent is the replying party of a session. It is immutable within a
//! processing cycle: the engine reads it once while loading context and
//! never observes mid-cycle mutation.

use crate::event::Participant;
use crate::types::{AgentId, CustomerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the final reply text is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionMode {
    /// Pure LLM free text
    Fluid,
    /// Reply must be one of the rendered canned templates, verbatim
    CannedStrict,
    /// Draft is rewritten in the style of the best-matching template
    CannedComposited,
    /// Best-matching template if the match is high quality, else the draft
    CannedFluid,
}

impl CompositionMode {
    /// Whether this mode goes through the canned-response pipeline
    pub fn uses_canned_responses(&self) -> bool {
        !matches!(self, CompositionMode::Fluid)
    }
}

impl Default for CompositionMode {
    fn default() -> Self {
        Self::Fluid
    }
}

fn default_max_engine_iterations() -> usize {
    3
}

/// Identity of the replying party
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub composition_mode: CompositionMode,
    /// Upper bound on preparation iterations per cycle
    #[serde(default = "default_max_engine_iterations")]
    pub max_engine_iterations: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Create an agent with default composition settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            description: None,
            composition_mode: CompositionMode::default(),
            max_engine_iterations: default_max_engine_iterations(),
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the composition mode
    pub fn with_composition_mode(mut self, mode: CompositionMode) -> Self {
        self.composition_mode = mode;
        self
    }

    /// Set the iteration cap
    pub fn with_max_engine_iterations(mut self, max: usize) -> Self {
        self.max_engine_iterations = max.max(1);
        self
    }

    /// The participant block recorded on emitted message events
    pub fn participant(&self) -> Participant {
        Participant {
            id: self.id.to_string(),
            display_name: self.name.clone(),
        }
    }
}

/// The customer side of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Create a customer
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CustomerId::new(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }

    /// Placeholder customer for sessions created without one
    pub fn guest() -> Self {
        Self::new("Guest")
    }
}
