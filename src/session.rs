//! Session management for agent conversations
//!
//! A session is an ordered conversation between a customer and an agent.
//! Alongside its event log (held by the session store) it carries a sequence
//! of [`AgentState`] snapshots, one appended per completed processing cycle.
//! `agent_states.last()` always reflects the state *before* the cycle
//! currently running; a new snapshot is appended only at post-processing.

use crate::types::{AgentId, CustomerId, GuidelineId, JourneyId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Processing mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// The engine replies automatically to customer messages
    Auto,
    /// A human agent owns the conversation; the engine performs no work
    Manual,
}

impl Default for SessionMode {
    fn default() -> Self {
        Self::Auto
    }
}

/// Snapshot of guideline/journey progress after a completed cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Guidelines whose action has been carried out in a prior turn
    pub applied_guideline_ids: HashSet<GuidelineId>,
    /// Per journey, the id of the journey-node guideline matched at each
    /// completed iteration (`None` when no step of that journey matched)
    pub journey_paths: HashMap<JourneyId, Vec<Option<GuidelineId>>>,
}

impl AgentState {
    /// Whether the given guideline was applied in a prior turn
    pub fn is_applied(&self, id: &GuidelineId) -> bool {
        self.applied_guideline_ids.contains(id)
    }

    /// Last selected step of a journey, if any
    pub fn current_path_tip(&self, journey_id: &JourneyId) -> Option<&GuidelineId> {
        self.journey_paths
            .get(journey_id)
            .and_then(|path| path.iter().rev().flatten().next())
    }
}

/// An ordered conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub customer_id: CustomerId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// One snapshot per completed processing cycle, oldest first
    #[serde(default)]
    pub agent_states: Vec<AgentState>,
}

impl Session {
    /// Create a new automatic session
    pub fn new(agent_id: AgentId, customer_id: CustomerId) -> Self {
        Self {
            id: SessionId::new(),
            agent_id,
            customer_id,
            created_at: Utc::now(),
            mode: SessionMode::Auto,
            title: None,
            agent_states: Vec::new(),
        }
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the mode
    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    /// State accumulated before the current cycle (empty for a fresh session)
    pub fn latest_agent_state(&self) -> AgentState {
        self.agent_states.last().cloned().unwrap_or_default()
    }

    /// Append the snapshot produced by a completed cycle
    pub fn push_agent_state(&mut self, state: AgentState) {
        self.agent_states.push(state);
    }

    /// Whether the engine should process messages in this session
    pub fn is_automatic(&self) -> bool {
        self.mode == SessionMode::Auto
    }
}
