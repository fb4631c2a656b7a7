//! In-memory storage implementations
//!
//! Thread-safe development and test backends: a HashMap behind an async
//! RwLock per store. The session store assigns event offsets under its
//! write lock, which is what makes offsets monotonic and gap-free.

use crate::agent::{Agent, Customer};
use crate::canned::CannedResponse;
use crate::context::{Capability, ContextVariable, Term};
use crate::error::{StorageError, StorageResult};
use crate::event::{Event, EventKind, EventSource};
use crate::guideline::Guideline;
use crate::journey::{Journey, JourneyEdge, JourneyNode};
use crate::relevance::rank_by_relevance;
use crate::session::Session;
use crate::storage::{
    AgentStore, CannedResponseStore, CapabilityStore, ContextVariableStore, CustomerStore,
    EventFilter, GlossaryStore, GuidelineStore, GuidelineToolAssociation,
    GuidelineToolAssociationStore, Inspection, JourneyNodeToolAssociationStore, JourneyStore,
    SessionStore,
};
use crate::tool::ToolId;
use crate::types::{AgentId, CustomerId, EventId, JourneyId, NodeId, SessionId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Relevance floor for lexical retrieval
const RELEVANCE_THRESHOLD: f32 = 0.25;

/// In-memory session and event-log store
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    events: Arc<RwLock<HashMap<SessionId, Vec<Event>>>>,
    inspections: Arc<RwLock<Vec<Inspection>>>,
}

impl InMemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store holds no sessions
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Inspection records persisted so far (testing)
    pub async fn inspections(&self) -> Vec<Inspection> {
        self.inspections.read().await.clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, session: Session) -> StorageResult<SessionId> {
        let id = session.id;
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(StorageError::AlreadyExists(id.to_string()));
        }
        sessions.insert(id, session);
        Ok(id)
    }

    async fn read_session(&self, id: &SessionId) -> StorageResult<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or(StorageError::SessionNotFound(*id))
    }

    async fn update_session(&self, session: Session) -> StorageResult<()> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(StorageError::SessionNotFound(session.id));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn create_event(
        &self,
        session_id: &SessionId,
        kind: EventKind,
        source: EventSource,
        correlation_id: &str,
        data: serde_json::Value,
    ) -> StorageResult<Event> {
        {
            let sessions = self.sessions.read().await;
            if !sessions.contains_key(session_id) {
                return Err(StorageError::SessionNotFound(*session_id));
            }
        }

        let mut events = self.events.write().await;
        let log = events.entry(*session_id).or_default();
        let event = Event {
            id: EventId::new(),
            offset: log.len() as u64,
            kind,
            source,
            correlation_id: correlation_id.to_string(),
            created_at: Utc::now(),
            data,
        };
        log.push(event.clone());
        Ok(event)
    }

    async fn list_events(
        &self,
        session_id: &SessionId,
        filter: &EventFilter,
    ) -> StorageResult<Vec<Event>> {
        let events = self.events.read().await;
        let log = events.get(session_id).cloned().unwrap_or_default();
        Ok(log
            .into_iter()
            .filter(|e| e.offset >= filter.min_offset)
            .filter(|e| filter.kinds.is_empty() || filter.kinds.contains(&e.kind))
            .filter(|e| filter.source.map(|s| e.source == s).unwrap_or(true))
            .collect())
    }

    async fn create_inspection(&self, inspection: Inspection) -> StorageResult<()> {
        self.inspections.write().await.push(inspection);
        Ok(())
    }
}

/// In-memory agent store
#[derive(Clone, Default)]
pub struct InMemoryAgentStore {
    agents: Arc<RwLock<HashMap<AgentId, Agent>>>,
}

impl InMemoryAgentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent
    pub async fn add(&self, agent: Agent) -> AgentId {
        let id = agent.id;
        self.agents.write().await.insert(id, agent);
        id
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn read_agent(&self, id: &AgentId) -> StorageResult<Agent> {
        self.agents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StorageError::AgentNotFound(*id))
    }
}

/// In-memory customer store
#[derive(Clone, Default)]
pub struct InMemoryCustomerStore {
    customers: Arc<RwLock<HashMap<CustomerId, Customer>>>,
}

impl InMemoryCustomerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a customer
    pub async fn add(&self, customer: Customer) -> CustomerId {
        let id = customer.id;
        self.customers.write().await.insert(id, customer);
        id
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn read_customer(&self, id: &CustomerId) -> StorageResult<Customer> {
        self.customers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StorageError::CustomerNotFound(*id))
    }
}

/// In-memory guideline store
#[derive(Clone, Default)]
pub struct InMemoryGuidelineStore {
    guidelines: Arc<RwLock<Vec<Guideline>>>,
}

impl InMemoryGuidelineStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a guideline
    pub async fn add(&self, guideline: Guideline) {
        self.guidelines.write().await.push(guideline);
    }
}

#[async_trait]
impl GuidelineStore for InMemoryGuidelineStore {
    async fn list_guidelines(&self, tags: &[String]) -> StorageResult<Vec<Guideline>> {
        let guidelines = self.guidelines.read().await;
        Ok(guidelines
            .iter()
            .filter(|g| g.enabled)
            .filter(|g| tags.is_empty() || g.tags.iter().any(|t| tags.contains(t)))
            .cloned()
            .collect())
    }
}

/// In-memory journey store
#[derive(Clone, Default)]
pub struct InMemoryJourneyStore {
    journeys: Arc<RwLock<HashMap<JourneyId, Journey>>>,
}

impl InMemoryJourneyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a journey
    pub async fn add(&self, journey: Journey) -> JourneyId {
        let id = journey.id;
        self.journeys.write().await.insert(id, journey);
        id
    }
}

#[async_trait]
impl JourneyStore for InMemoryJourneyStore {
    async fn read_journey(&self, id: &JourneyId) -> StorageResult<Journey> {
        self.journeys
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StorageError::JourneyNotFound(*id))
    }

    async fn list_nodes(&self, id: &JourneyId) -> StorageResult<Vec<JourneyNode>> {
        let journey = self.read_journey(id).await?;
        Ok(journey.nodes.into_values().collect())
    }

    async fn list_edges(&self, id: &JourneyId) -> StorageResult<Vec<JourneyEdge>> {
        let journey = self.read_journey(id).await?;
        Ok(journey.edges)
    }

    async fn find_relevant(
        &self,
        query: &str,
        available: &[JourneyId],
        max_journeys: usize,
    ) -> StorageResult<Vec<Journey>> {
        let journeys = self.journeys.read().await;
        let candidates: Vec<Journey> = journeys
            .values()
            .filter(|j| available.is_empty() || available.contains(&j.id))
            .cloned()
            .collect();

        Ok(rank_by_relevance(
            query,
            candidates,
            |journey| {
                let mut texts = vec![journey.title.clone()];
                texts.extend(journey.conditions.iter().cloned());
                texts
            },
            RELEVANCE_THRESHOLD,
            max_journeys,
        ))
    }
}

/// In-memory association registries (guideline→tool and journey-node→tool)
#[derive(Clone, Default)]
pub struct InMemoryAssociationStore {
    guideline_tools: Arc<RwLock<Vec<GuidelineToolAssociation>>>,
    node_tools: Arc<RwLock<HashMap<NodeId, Vec<ToolId>>>>,
}

impl InMemoryAssociationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a guideline with a tool
    pub async fn associate_guideline(
        &self,
        guideline_id: crate::types::GuidelineId,
        tool_id: ToolId,
    ) {
        self.guideline_tools
            .write()
            .await
            .push(GuidelineToolAssociation {
                guideline_id,
                tool_id,
            });
    }

    /// Associate a journey node with a tool
    pub async fn associate_node(&self, node_id: NodeId, tool_id: ToolId) {
        self.node_tools
            .write()
            .await
            .entry(node_id)
            .or_default()
            .push(tool_id);
    }
}

#[async_trait]
impl GuidelineToolAssociationStore for InMemoryAssociationStore {
    async fn find_all(&self) -> StorageResult<Vec<GuidelineToolAssociation>> {
        Ok(self.guideline_tools.read().await.clone())
    }
}

#[async_trait]
impl JourneyNodeToolAssociationStore for InMemoryAssociationStore {
    async fn find_for_node(&self, node_id: &NodeId) -> StorageResult<Vec<ToolId>> {
        Ok(self
            .node_tools
            .read()
            .await
            .get(node_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory canned-response store
#[derive(Clone, Default)]
pub struct InMemoryCannedResponseStore {
    responses: Arc<RwLock<Vec<CannedResponse>>>,
}

impl InMemoryCannedResponseStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a canned response
    pub async fn add(&self, response: CannedResponse) {
        self.responses.write().await.push(response);
    }
}

#[async_trait]
impl CannedResponseStore for InMemoryCannedResponseStore {
    async fn find_for_context(
        &self,
        agent: &Agent,
        _journeys: &[Journey],
        _guidelines: &[Guideline],
    ) -> StorageResult<Vec<CannedResponse>> {
        // Tag-scoped: templates with no tags are global; tagged templates
        // only reach agents sharing a tag. Preamble templates pass through.
        let responses = self.responses.read().await;
        Ok(responses
            .iter()
            .filter(|r| {
                r.tags.is_empty()
                    || r.has_tag(crate::event::PREAMBLE_TAG)
                    || r.tags.iter().any(|t| agent.tags.contains(t))
            })
            .cloned()
            .collect())
    }
}

/// In-memory context-variable and capability store
#[derive(Clone, Default)]
pub struct InMemoryContextStore {
    variables: Arc<RwLock<HashMap<(AgentId, CustomerId), Vec<ContextVariable>>>>,
    capabilities: Arc<RwLock<HashMap<AgentId, Vec<Capability>>>>,
}

impl InMemoryContextStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable for an (agent, customer) pair
    pub async fn add_variable(
        &self,
        agent_id: AgentId,
        customer_id: CustomerId,
        variable: ContextVariable,
    ) {
        self.variables
            .write()
            .await
            .entry((agent_id, customer_id))
            .or_default()
            .push(variable);
    }

    /// Add a capability for an agent
    pub async fn add_capability(&self, agent_id: AgentId, capability: Capability) {
        self.capabilities
            .write()
            .await
            .entry(agent_id)
            .or_default()
            .push(capability);
    }
}

#[async_trait]
impl ContextVariableStore for InMemoryContextStore {
    async fn read_variables(
        &self,
        agent_id: &AgentId,
        customer_id: &CustomerId,
    ) -> StorageResult<Vec<ContextVariable>> {
        Ok(self
            .variables
            .read()
            .await
            .get(&(*agent_id, *customer_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl CapabilityStore for InMemoryContextStore {
    async fn find_capabilities(&self, agent_id: &AgentId) -> StorageResult<Vec<Capability>> {
        Ok(self
            .capabilities
            .read()
            .await
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory glossary store
#[derive(Clone, Default)]
pub struct InMemoryGlossaryStore {
    terms: Arc<RwLock<Vec<Term>>>,
}

impl InMemoryGlossaryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a term
    pub async fn add(&self, term: Term) {
        self.terms.write().await.push(term);
    }
}

#[async_trait]
impl GlossaryStore for InMemoryGlossaryStore {
    async fn find_relevant(&self, query: &str, max_terms: usize) -> StorageResult<Vec<Term>> {
        let terms = self.terms.read().await.clone();
        Ok(rank_by_relevance(
            query,
            terms,
            |term| term.retrieval_texts(),
            RELEVANCE_THRESHOLD,
            max_terms,
        ))
    }
}
