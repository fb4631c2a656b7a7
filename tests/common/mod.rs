//! Shared test harness: a rule-based scripted generator and a fully wired
//! engine over in-memory stores.

use async_trait::async_trait;
use converse::engine::{EngineConfig, EngineSettings, EventPublisher, ProcessingEngine};
use converse::storage::memory::{
    InMemoryAgentStore, InMemoryAssociationStore, InMemoryCannedResponseStore,
    InMemoryContextStore, InMemoryCustomerStore, InMemoryGlossaryStore, InMemoryGuidelineStore,
    InMemoryJourneyStore, InMemorySessionStore,
};
use converse::storage::{EventFilter, SessionStore};
use converse::{
    Agent, CorrelationScope, Customer, EngineError, Event, EventKind, EventSource,
    MessageEventData, NoopHooks, Participant, Result, SchematicGenerator, Session, TokenUsage,
    ToolRegistry,
};
use converse::{AgentId, CustomerId, SessionId};
use converse::{GenerationHints, Status};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Responds with the first rule whose pattern appears in the prompt.
///
/// Matcher batches run concurrently, so responses are keyed by prompt
/// content (guideline conditions, tool names, stage markers) rather than by
/// call order. Unmatched matcher/analysis prompts fall back to "nothing
/// applies" so tests only script what they care about.
pub struct RuleBasedGenerator {
    rules: Mutex<Vec<(String, serde_json::Value)>>,
    prompts: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl RuleBasedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// Respond with `response` whenever `pattern` appears in the prompt
    pub fn respond(self, pattern: &str, response: serde_json::Value) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), response));
        self
    }

    /// Block every generation on the semaphore (one permit per call)
    pub fn gated(self, gate: Arc<Semaphore>) -> Self {
        *self.gate.lock().unwrap() = Some(gate);
        self
    }

    /// Every prompt seen so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchematicGenerator for RuleBasedGenerator {
    async fn generate_value(
        &self,
        prompt: &str,
        _schema: serde_json::Value,
        _hints: &GenerationHints,
    ) -> Result<(serde_json::Value, TokenUsage)> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| EngineError::Llm("gate closed".to_string()))?;
            permit.forget();
        }

        self.prompts.lock().unwrap().push(prompt.to_string());

        let rules = self.rules.lock().unwrap();
        for (pattern, response) in rules.iter() {
            if prompt.contains(pattern.as_str()) {
                return Ok((response.clone(), TokenUsage::default()));
            }
        }

        // Default verdicts keep unscripted flows moving.
        if prompt.contains("For every rule return one check") {
            return Ok((
                serde_json::json!({"checks": [
                    {"guideline_number": 1, "applies": false, "confidence": 0.9, "rationale": "not relevant"}
                ]}),
                TokenUsage::default(),
            ));
        }
        if prompt.contains("For each required action") {
            return Ok((serde_json::json!({ "checks": [] }), TokenUsage::default()));
        }

        Err(EngineError::Llm(format!(
            "no scripted response for prompt: {}",
            &prompt[..prompt.len().min(120)]
        )))
    }

    fn name(&self) -> &str {
        "RuleBased"
    }
}

/// A matcher-batch response asserting the (single) guideline applies
pub fn applies(rationale: &str) -> serde_json::Value {
    serde_json::json!({"checks": [
        {"guideline_number": 1, "applies": true, "confidence": 0.9, "rationale": rationale}
    ]})
}

/// Pattern matching the batch listing of a single-guideline batch.
///
/// Guideline conditions also appear in tool-inference prompts; anchoring on
/// the numbered listing keeps a rule from answering the wrong call.
pub fn listed(condition: &str) -> String {
    format!("1. When: {condition}")
}

/// A fully wired engine over in-memory stores
pub struct Harness {
    pub sessions: Arc<InMemorySessionStore>,
    pub guidelines: Arc<InMemoryGuidelineStore>,
    pub canned: Arc<InMemoryCannedResponseStore>,
    pub associations: Arc<InMemoryAssociationStore>,
    pub registry: Arc<ToolRegistry>,
    pub generator: Arc<RuleBasedGenerator>,
    pub engine: Arc<ProcessingEngine>,
    pub agent_id: AgentId,
    pub customer_id: CustomerId,
}

impl Harness {
    /// Build with preambles off (the default for scenario tests)
    pub async fn new(agent: Agent, generator: RuleBasedGenerator) -> Self {
        let mut settings = EngineSettings::default();
        settings.preamble_enabled = false;
        Self::with_settings(agent, generator, settings).await
    }

    pub async fn with_settings(
        agent: Agent,
        generator: RuleBasedGenerator,
        settings: EngineSettings,
    ) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let sessions = Arc::new(InMemorySessionStore::new());
        let agents = Arc::new(InMemoryAgentStore::new());
        let customers = Arc::new(InMemoryCustomerStore::new());
        let guidelines = Arc::new(InMemoryGuidelineStore::new());
        let journeys = Arc::new(InMemoryJourneyStore::new());
        let canned = Arc::new(InMemoryCannedResponseStore::new());
        let glossary = Arc::new(InMemoryGlossaryStore::new());
        let context_store = Arc::new(InMemoryContextStore::new());
        let associations = Arc::new(InMemoryAssociationStore::new());
        let registry = Arc::new(ToolRegistry::new());
        let generator = Arc::new(generator);

        let agent_id = agents.add(agent).await;
        let customer_id = customers.add(Customer::new("Dana")).await;

        let engine = Arc::new(ProcessingEngine::new(EngineConfig {
            session_store: sessions.clone(),
            agent_store: agents,
            customer_store: customers,
            guideline_store: guidelines.clone(),
            journey_store: journeys.clone(),
            canned_store: canned.clone(),
            variable_store: context_store.clone(),
            glossary_store: glossary.clone(),
            capability_store: context_store.clone(),
            guideline_tool_associations: associations.clone(),
            node_tool_associations: associations.clone(),
            tool_registry: registry.clone(),
            generator: generator.clone(),
            hooks: Arc::new(NoopHooks),
            settings,
        }));

        Self {
            sessions,
            guidelines,
            canned,
            associations,
            registry,
            generator,
            engine,
            agent_id,
            customer_id,
        }
    }

    pub async fn create_session(&self) -> SessionId {
        let session = Session::new(self.agent_id, self.customer_id);
        self.sessions.create_session(session).await.unwrap()
    }

    pub async fn add_customer_message(&self, session_id: SessionId, text: &str) {
        let data = MessageEventData::new(
            text,
            Participant {
                id: self.customer_id.to_string(),
                display_name: "Dana".to_string(),
            },
        );
        self.sessions
            .create_event(
                &session_id,
                EventKind::Message,
                EventSource::Customer,
                "Rcustomer",
                data.to_value(),
            )
            .await
            .unwrap();
    }

    pub async fn process(&self, session_id: SessionId) -> Result<bool> {
        let scope = CorrelationScope::root().push("process");
        let emitter = Arc::new(EventPublisher::new(
            self.sessions.clone(),
            session_id,
            EventSource::AiAgent,
        ));
        self.engine
            .process(
                &scope,
                session_id,
                self.agent_id,
                emitter,
                CancellationToken::new(),
            )
            .await
    }

    pub async fn events(&self, session_id: SessionId) -> Vec<Event> {
        self.sessions
            .list_events(&session_id, &EventFilter::default())
            .await
            .unwrap()
    }

    /// Events emitted by the engine (everything after the customer message)
    pub async fn engine_events(&self, session_id: SessionId) -> Vec<Event> {
        self.events(session_id)
            .await
            .into_iter()
            .filter(|e| e.source == EventSource::AiAgent)
            .collect()
    }
}

/// Compact shape of an engine event, for order assertions
pub fn shape(event: &Event) -> String {
    match event.kind {
        EventKind::Status => {
            let status = event.as_status().unwrap();
            match status.status {
                Status::Processing => format!(
                    "processing:{}",
                    status.data.stage.unwrap_or_default()
                ),
                other => format!("{:?}", other).to_lowercase(),
            }
        }
        EventKind::Message => "message".to_string(),
        EventKind::Tool => "tool".to_string(),
        EventKind::Custom => "custom".to_string(),
    }
}

/// Assert offsets are strictly increasing and gap-free from zero
pub fn assert_offsets_gap_free(events: &[Event]) {
    for (index, event) in events.iter().enumerate() {
        assert_eq!(
            event.offset, index as u64,
            "offset mismatch at position {index}"
        );
    }
}
