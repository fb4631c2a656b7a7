//! Storage backends
//!
//! The engine consumes persistence through narrow trait interfaces; nothing
//! in the processing pipeline knows how sessions, guidelines or journeys are
//! actually stored. The session store is the only cross-task shared mutable
//! resource: it serializes event appends and assigns monotonic, gap-free
//! offsets under its own lock.

use crate::agent::{Agent, Customer};
use crate::canned::CannedResponse;
use crate::context::{Capability, ContextVariable, IterationState, Term};
use crate::error::StorageResult;
use crate::event::{Event, EventKind, EventSource};
use crate::guideline::Guideline;
use crate::journey::{Journey, JourneyEdge, JourneyNode};
use crate::session::Session;
use crate::tool::ToolId;
use crate::types::{AgentId, CustomerId, GuidelineId, JourneyId, NodeId, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;

/// Filter for event listing
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events with offset >= this value
    pub min_offset: u64,
    /// Only these kinds (empty = all)
    pub kinds: Vec<EventKind>,
    /// Only this source
    pub source: Option<EventSource>,
}

/// Per-cycle diagnostic snapshot persisted at post-processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub session_id: SessionId,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub iterations: Vec<IterationState>,
}

/// Sessions and their append-only event logs
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session
    async fn create_session(&self, session: Session) -> StorageResult<SessionId>;

    /// Read a session by id
    async fn read_session(&self, id: &SessionId) -> StorageResult<Session>;

    /// Replace a session (mode changes, appended agent states)
    async fn update_session(&self, session: Session) -> StorageResult<()>;

    /// Append an event; the store assigns the next offset
    async fn create_event(
        &self,
        session_id: &SessionId,
        kind: EventKind,
        source: EventSource,
        correlation_id: &str,
        data: serde_json::Value,
    ) -> StorageResult<Event>;

    /// List events matching a filter, ordered by offset
    async fn list_events(
        &self,
        session_id: &SessionId,
        filter: &EventFilter,
    ) -> StorageResult<Vec<Event>>;

    /// Persist a per-cycle inspection record
    async fn create_inspection(&self, inspection: Inspection) -> StorageResult<()>;
}

/// Agent identities
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Read an agent by id
    async fn read_agent(&self, id: &AgentId) -> StorageResult<Agent>;
}

/// Customer identities
#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Read a customer by id
    async fn read_customer(&self, id: &CustomerId) -> StorageResult<Customer>;
}

/// Behavioral guidelines
#[async_trait]
pub trait GuidelineStore: Send + Sync {
    /// List enabled guidelines; with tags, only those carrying at least one
    async fn list_guidelines(&self, tags: &[String]) -> StorageResult<Vec<Guideline>>;
}

/// Journey graphs
#[async_trait]
pub trait JourneyStore: Send + Sync {
    /// Read a journey by id
    async fn read_journey(&self, id: &JourneyId) -> StorageResult<Journey>;

    /// List the nodes of a journey
    async fn list_nodes(&self, id: &JourneyId) -> StorageResult<Vec<JourneyNode>>;

    /// List the edges of a journey
    async fn list_edges(&self, id: &JourneyId) -> StorageResult<Vec<JourneyEdge>>;

    /// The journeys most relevant to a query, best first
    async fn find_relevant(
        &self,
        query: &str,
        available: &[JourneyId],
        max_journeys: usize,
    ) -> StorageResult<Vec<Journey>>;
}

/// An explicit link between a guideline and a tool it may invoke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineToolAssociation {
    pub guideline_id: GuidelineId,
    pub tool_id: ToolId,
}

/// Guideline → tool links (exact id matches, never semantic)
#[async_trait]
pub trait GuidelineToolAssociationStore: Send + Sync {
    /// All known associations
    async fn find_all(&self) -> StorageResult<Vec<GuidelineToolAssociation>>;
}

/// Journey-node → tool links
#[async_trait]
pub trait JourneyNodeToolAssociationStore: Send + Sync {
    /// Tools associated with a journey node
    async fn find_for_node(&self, node_id: &NodeId) -> StorageResult<Vec<ToolId>>;
}

/// Pre-authored reply templates
#[async_trait]
pub trait CannedResponseStore: Send + Sync {
    /// Templates relevant to the given agent, journeys and matched guidelines
    async fn find_for_context(
        &self,
        agent: &Agent,
        journeys: &[Journey],
        guidelines: &[Guideline],
    ) -> StorageResult<Vec<CannedResponse>>;
}

/// Key/value pairs scoped to an (agent, customer) pair
#[async_trait]
pub trait ContextVariableStore: Send + Sync {
    /// Variables for the pair
    async fn read_variables(
        &self,
        agent_id: &AgentId,
        customer_id: &CustomerId,
    ) -> StorageResult<Vec<ContextVariable>>;
}

/// Domain glossary
#[async_trait]
pub trait GlossaryStore: Send + Sync {
    /// The terms most relevant to a query, best first
    async fn find_relevant(&self, query: &str, max_terms: usize) -> StorageResult<Vec<Term>>;
}

/// Agent capabilities
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// Capabilities of an agent
    async fn find_capabilities(&self, agent_id: &AgentId) -> StorageResult<Vec<Capability>>;
}
