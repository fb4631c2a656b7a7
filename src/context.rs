//! Per-cycle working set
//!
//! When the engine processes a session it first loads a read-only snapshot
//! of everything the cycle needs — session, agent, customer, interaction
//! history, context variables, glossary terms, capabilities — into a
//! [`LoadedContext`]. The context lives for exactly one cycle, is mutated
//! only from the engine's own task, and records one [`IterationState`]
//! per preparation iteration.

use crate::agent::{Agent, Customer};
use crate::event::{Event, EventKind, EventSource, MessageEventData};
use crate::guideline::GuidelineMatch;
use crate::journey::Journey;
use crate::session::Session;
use crate::tool::ToolInsights;
use crate::types::{GuidelineId, JourneyId, TermId, VariableId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A glossary term relevant to the agent's domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Term {
    /// Create a term
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: TermId::new(),
            name: name.into(),
            description: description.into(),
            synonyms: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Set synonyms
    pub fn with_synonyms(mut self, synonyms: Vec<String>) -> Self {
        self.synonyms = synonyms;
        self
    }

    /// Texts considered during relevance ranking
    pub fn retrieval_texts(&self) -> Vec<String> {
        let mut texts = vec![self.name.clone(), self.description.clone()];
        texts.extend(self.synonyms.iter().cloned());
        texts
    }
}

/// A key/value pair scoped to an (agent, customer) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextVariable {
    pub id: VariableId,
    pub name: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContextVariable {
    /// Create a variable
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            id: VariableId::new(),
            name: name.into(),
            value,
            description: None,
            created_at: Utc::now(),
        }
    }
}

/// Something the agent is able to do for the customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: crate::types::CapabilityId,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Capability {
    /// Create a capability
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: crate::types::CapabilityId::new(),
            title: title.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// The event history of a session up to the moment a cycle started
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub events: Vec<Event>,
}

impl Interaction {
    /// Wrap an ordered event list
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    /// The most recent customer message text
    pub fn last_customer_message(&self) -> Option<String> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.kind == EventKind::Message && e.source == EventSource::Customer)
            .find_map(|e| e.as_message())
            .map(|m| m.message)
    }

    /// The most recent agent message payload
    pub fn last_agent_message(&self) -> Option<MessageEventData> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.kind == EventKind::Message && e.source == EventSource::AiAgent)
            .find_map(|e| e.as_message())
    }

    /// Seconds the customer waited for a substantive reply in each prior
    /// turn: for every customer message answered by a later non-preamble
    /// agent message, the gap between the two.
    pub fn previous_wait_times(&self) -> Vec<f64> {
        let mut waits = Vec::new();
        let mut pending: Option<DateTime<Utc>> = None;

        for event in &self.events {
            if event.kind != EventKind::Message {
                continue;
            }
            match event.source {
                EventSource::Customer => {
                    if pending.is_none() {
                        pending = Some(event.created_at);
                    }
                }
                EventSource::AiAgent | EventSource::HumanAgent => {
                    let is_preamble = event.as_message().map(|m| m.is_preamble()).unwrap_or(false);
                    if is_preamble {
                        continue;
                    }
                    if let Some(asked_at) = pending.take() {
                        let wait = (event.created_at - asked_at).num_milliseconds() as f64 / 1000.0;
                        waits.push(wait.max(0.0));
                    }
                }
                EventSource::System => {}
            }
        }

        waits
    }

    /// Render the conversation for inclusion in a prompt
    pub fn transcript(&self) -> String {
        let mut lines = Vec::new();
        for event in &self.events {
            match event.kind {
                EventKind::Message => {
                    if let Some(message) = event.as_message() {
                        let speaker = match event.source {
                            EventSource::Customer => "Customer",
                            EventSource::AiAgent => "Agent",
                            EventSource::HumanAgent => "Human agent",
                            EventSource::System => "System",
                        };
                        lines.push(format!("{}: {}", speaker, message.message));
                    }
                }
                EventKind::Tool => {
                    if let Some(tool) = event.as_tool() {
                        for call in tool.tool_calls {
                            lines.push(format!(
                                "[tool result: {}]",
                                serde_json::to_string(&call.result.data)
                                    .unwrap_or_else(|_| "{}".to_string())
                            ));
                        }
                    }
                }
                EventKind::Status | EventKind::Custom => {}
            }
        }
        lines.join("\n")
    }

}

/// Snapshot of one preparation iteration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationState {
    /// Every guideline the matcher decided applies this iteration
    pub matched_guidelines: Vec<GuidelineMatch>,
    /// Matches associated with at least one enabled tool
    pub tool_enabled_matches: Vec<GuidelineMatch>,
    /// Matches with no enabled tool association
    pub ordinary_matches: Vec<GuidelineMatch>,
    /// Tool events emitted during this iteration
    pub tool_events: Vec<Event>,
    /// Context variables observed
    pub context_variables: Vec<ContextVariable>,
    /// Glossary terms loaded for the current query
    pub glossary_terms: Vec<Term>,
    /// Journeys considered
    pub journeys: Vec<Journey>,
    /// Per journey, the journey-node guideline selected this iteration
    pub journey_steps: HashMap<JourneyId, Option<GuidelineId>>,
    /// Active capabilities
    pub capabilities: Vec<Capability>,
    /// Parameters needed but unavailable this iteration
    pub tool_insights: ToolInsights,
}

/// Per-cycle mutable working set
#[derive(Debug, Clone)]
pub struct LoadedContext {
    pub session: Session,
    pub agent: Agent,
    pub customer: Customer,
    pub interaction: Interaction,
    pub iterations: Vec<IterationState>,
    pub prepared_to_respond: bool,
}

impl LoadedContext {
    /// Create the working set for one cycle
    pub fn new(
        session: Session,
        agent: Agent,
        customer: Customer,
        interaction: Interaction,
    ) -> Self {
        Self {
            session,
            agent,
            customer,
            interaction,
            iterations: Vec::new(),
            prepared_to_respond: false,
        }
    }

    /// The iteration currently being built
    pub fn current_iteration(&self) -> Option<&IterationState> {
        self.iterations.last()
    }

    /// All matches accumulated across iterations, in match order
    pub fn all_matches(&self) -> Vec<&GuidelineMatch> {
        self.iterations
            .iter()
            .flat_map(|i| i.matched_guidelines.iter())
            .collect()
    }

    /// Ordinary matches accumulated across iterations
    pub fn ordinary_matches(&self) -> Vec<&GuidelineMatch> {
        self.iterations
            .iter()
            .flat_map(|i| i.ordinary_matches.iter())
            .collect()
    }

    /// Tool-enabled matches accumulated across iterations
    pub fn tool_enabled_matches(&self) -> Vec<&GuidelineMatch> {
        self.iterations
            .iter()
            .flat_map(|i| i.tool_enabled_matches.iter())
            .collect()
    }

    /// Tool events emitted across iterations
    pub fn tool_events(&self) -> Vec<&Event> {
        self.iterations
            .iter()
            .flat_map(|i| i.tool_events.iter())
            .collect()
    }

    /// Merged tool insights across iterations, precedence-filtered
    pub fn tool_insights(&self) -> ToolInsights {
        let mut merged = ToolInsights::default();
        for iteration in &self.iterations {
            merged.merge(iteration.tool_insights.clone());
        }
        merged.filtered()
    }

    /// Ids of guidelines matched in any iteration so far
    pub fn matched_guideline_ids(&self) -> Vec<GuidelineId> {
        self.all_matches()
            .iter()
            .map(|m| m.guideline.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Participant, StatusEventData, PREAMBLE_TAG};
    use crate::types::EventId;
    use chrono::Duration;

    fn message_event(
        offset: u64,
        source: EventSource,
        text: &str,
        at: DateTime<Utc>,
        tags: Vec<String>,
    ) -> Event {
        let mut data = MessageEventData::new(
            text,
            Participant {
                id: "p".to_string(),
                display_name: "P".to_string(),
            },
        );
        data.tags = tags;
        Event {
            id: EventId::new(),
            offset,
            kind: EventKind::Message,
            source,
            correlation_id: "R1".to_string(),
            created_at: at,
            data: data.to_value(),
        }
    }

    #[test]
    fn test_last_customer_message() {
        let now = Utc::now();
        let interaction = Interaction::new(vec![
            message_event(0, EventSource::Customer, "first", now, vec![]),
            message_event(1, EventSource::AiAgent, "reply", now, vec![]),
            message_event(2, EventSource::Customer, "second", now, vec![]),
        ]);
        assert_eq!(
            interaction.last_customer_message(),
            Some("second".to_string())
        );
    }

    #[test]
    fn test_previous_wait_times() {
        let start = Utc::now();
        let interaction = Interaction::new(vec![
            message_event(0, EventSource::Customer, "q1", start, vec![]),
            message_event(
                1,
                EventSource::AiAgent,
                "a1",
                start + Duration::seconds(2),
                vec![],
            ),
            message_event(
                2,
                EventSource::Customer,
                "q2",
                start + Duration::seconds(10),
                vec![],
            ),
            message_event(
                3,
                EventSource::AiAgent,
                "a2",
                start + Duration::seconds(16),
                vec![],
            ),
        ]);

        let waits = interaction.previous_wait_times();
        assert_eq!(waits.len(), 2);
        assert!((waits[0] - 2.0).abs() < 0.01);
        assert!((waits[1] - 6.0).abs() < 0.01);
    }

    #[test]
    fn test_wait_times_skip_preambles() {
        let start = Utc::now();
        let interaction = Interaction::new(vec![
            message_event(0, EventSource::Customer, "q", start, vec![]),
            message_event(
                1,
                EventSource::AiAgent,
                "One sec...",
                start + Duration::seconds(1),
                vec![PREAMBLE_TAG.to_string()],
            ),
            message_event(
                2,
                EventSource::AiAgent,
                "Here you go",
                start + Duration::seconds(7),
                vec![],
            ),
        ]);

        let waits = interaction.previous_wait_times();
        assert_eq!(waits.len(), 1);
        assert!((waits[0] - 7.0).abs() < 0.01);
    }

    #[test]
    fn test_transcript_includes_speakers() {
        let now = Utc::now();
        let interaction = Interaction::new(vec![
            message_event(0, EventSource::Customer, "hello", now, vec![]),
            message_event(1, EventSource::AiAgent, "hi there", now, vec![]),
        ]);
        let transcript = interaction.transcript();
        assert!(transcript.contains("Customer: hello"));
        assert!(transcript.contains("Agent: hi there"));
    }

    #[test]
    fn test_transcript_skips_status_events() {
        let now = Utc::now();
        let status = Event {
            id: EventId::new(),
            offset: 0,
            kind: EventKind::Status,
            source: EventSource::AiAgent,
            correlation_id: "R1".to_string(),
            created_at: now,
            data: StatusEventData::ready().to_value(),
        };
        let interaction = Interaction::new(vec![status]);
        assert!(interaction.transcript().is_empty());
    }

    #[test]
    fn test_loaded_context_accumulators() {
        use crate::agent::Agent;
        use crate::guideline::{Guideline, GuidelineContent};
        use crate::session::Session;
        use crate::types::{AgentId, CustomerId};

        let agent = Agent::new("Support");
        let session = Session::new(AgentId::new(), CustomerId::new());
        let mut context = LoadedContext::new(
            session,
            agent,
            Customer::guest(),
            Interaction::default(),
        );

        let matched = GuidelineMatch::new(
            Guideline::new(GuidelineContent::new("c", "a")),
            1.0,
            "applies",
        );

        let mut first = IterationState::default();
        first.matched_guidelines.push(matched.clone());
        first.ordinary_matches.push(matched.clone());
        context.iterations.push(first);

        let mut second = IterationState::default();
        second.matched_guidelines.push(matched.clone());
        second.tool_enabled_matches.push(matched);
        context.iterations.push(second);

        assert_eq!(context.all_matches().len(), 2);
        assert_eq!(context.ordinary_matches().len(), 1);
        assert_eq!(context.tool_enabled_matches().len(), 1);
        assert_eq!(context.matched_guideline_ids().len(), 2);
    }
}
