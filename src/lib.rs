//! # Converse - Event-Driven Conversational Agent Engine
//!
//! Converse turns an incoming customer message into one or more agent reply
//! messages by driving a session through a multi-stage, event-driven dialog
//! pipeline: Acknowledgement → Preparation (iterative guideline matching +
//! tool calling) → Preamble → Message generation → Post-processing, emitting
//! fine-grained status events throughout so a front-end can render progress
//! in real time.
//!
//! ## Features
//!
//! - **Guideline matching**: strategy-based, batched, concurrent LLM
//!   evaluation of natural-language behavioral rules
//! - **Journeys**: multi-step processes as node/edge graphs, projected onto
//!   guidelines for uniform matching
//! - **Tool orchestration**: per-tool applicability inference, argument
//!   validation, parallel execution, missing-parameter insights
//! - **Message composition**: fluid free-text or canned-response modes
//!   (strict, composited, canned-fluid) with paced multi-chunk emission
//! - **Per-session task isolation**: dispatching a new cycle cancels and
//!   replaces the in-flight one; message generation is shielded by a
//!   cancellation-suppression latch
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use converse::{
//!     Agent, Customer, CorrelationScope, EngineConfig, EngineSettings, EventPublisher,
//!     EventSource, Guideline, GuidelineContent, NoopHooks, OpenAiSchematicGenerator,
//!     ProcessingEngine, Session, ToolRegistry,
//! };
//! use converse::storage::memory::{
//!     InMemoryAgentStore, InMemoryAssociationStore, InMemoryCannedResponseStore,
//!     InMemoryContextStore, InMemoryCustomerStore, InMemoryGlossaryStore,
//!     InMemoryGuidelineStore, InMemoryJourneyStore, InMemorySessionStore,
//! };
//! use converse::storage::SessionStore;
//! use converse::event::{EventKind, MessageEventData, Participant};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sessions = Arc::new(InMemorySessionStore::new());
//! let agents = Arc::new(InMemoryAgentStore::new());
//! let customers = Arc::new(InMemoryCustomerStore::new());
//! let guidelines = Arc::new(InMemoryGuidelineStore::new());
//! let associations = Arc::new(InMemoryAssociationStore::new());
//! let context_store = Arc::new(InMemoryContextStore::new());
//!
//! let agent = Agent::new("Support");
//! let agent_id = agents.add(agent).await;
//! let customer = Customer::new("Dana");
//! let customer_id = customers.add(customer).await;
//!
//! guidelines
//!     .add(Guideline::new(GuidelineContent::new(
//!         "the customer greets the agent",
//!         "greet them back and offer help",
//!     )))
//!     .await;
//!
//! let engine = Arc::new(ProcessingEngine::new(EngineConfig {
//!     session_store: sessions.clone(),
//!     agent_store: agents,
//!     customer_store: customers,
//!     guideline_store: guidelines,
//!     journey_store: Arc::new(InMemoryJourneyStore::new()),
//!     canned_store: Arc::new(InMemoryCannedResponseStore::new()),
//!     variable_store: context_store.clone(),
//!     glossary_store: Arc::new(InMemoryGlossaryStore::new()),
//!     capability_store: context_store,
//!     guideline_tool_associations: associations.clone(),
//!     node_tool_associations: associations,
//!     tool_registry: Arc::new(ToolRegistry::new()),
//!     generator: Arc::new(OpenAiSchematicGenerator::from_env()?),
//!     hooks: Arc::new(NoopHooks),
//!     settings: EngineSettings::default(),
//! }));
//!
//! let session = Session::new(agent_id, customer_id);
//! let session_id = sessions.create_session(session).await?;
//! let scope = CorrelationScope::root();
//! sessions
//!     .create_event(
//!         &session_id,
//!         EventKind::Message,
//!         EventSource::Customer,
//!         scope.as_str(),
//!         MessageEventData::new(
//!             "hello!",
//!             Participant { id: customer_id.to_string(), display_name: "Dana".into() },
//!         )
//!         .to_value(),
//!     )
//!     .await?;
//!
//! let emitter = Arc::new(EventPublisher::new(
//!     sessions.clone(),
//!     session_id,
//!     EventSource::AiAgent,
//! ));
//! engine
//!     .process(
//!         &scope.push("process"),
//!         session_id,
//!         agent_id,
//!         emitter,
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`engine`]: the processing engine, matcher, tool caller, composer,
//!   emitters, hooks and background-task service
//! - [`agent`], [`session`], [`event`]: core entities and event shapes
//! - [`guideline`], [`journey`]: behavioral rules and their journey
//!   projection
//! - [`tool`]: tool definitions, registry and insights
//! - [`canned`]: reply templates, field parsing and rendering
//! - [`context`]: the per-cycle working set
//! - [`provider`]: schematic LLM adapters (OpenAI, Anthropic)
//! - [`storage`]: store traits and in-memory backends
//! - [`correlation`]: hierarchical correlation scopes
//!
//! ## License
//!
//! Licensed under either of Apache License 2.0 or MIT license at your option.

// Core type definitions
pub mod types;

// Error types
pub mod error;

// Correlation scopes
pub mod correlation;

// Session-log events
pub mod event;

// Agent and customer identities
pub mod agent;

// Session management
pub mod session;

// Behavioral guidelines
pub mod guideline;

// Journey graphs and projection
pub mod journey;

// Tool integration
pub mod tool;

// Canned-response templates
pub mod canned;

// Lexical relevance scoring
pub mod relevance;

// Per-cycle working set
pub mod context;

// Storage backends
pub mod storage;

// LLM adapters
pub mod provider;

// The processing engine
pub mod engine;

pub use agent::{Agent, CompositionMode, Customer};
pub use canned::CannedResponse;
pub use context::{Capability, ContextVariable, Interaction, IterationState, LoadedContext, Term};
pub use correlation::CorrelationScope;
pub use engine::{
    BackgroundTaskService, CancellationSuppressionLatch, ComposerOutput, EngineConfig,
    EngineHooks, EngineSettings, EventBuffer, EventEmitter, EventPublisher, GuidelineMatcher,
    HookOutcome, MatchingContext, MatchingResult, MessageComposer, NoopHooks, ProcessingEngine,
    StrategyResolver, ToolCaller, DEFAULT_PROCESS_TIMEOUT,
};
pub use error::{EngineError, Result, StorageError, ToolError};
pub use event::{
    Event, EventKind, EventSource, MessageEventData, Participant, Status, StatusEventData,
    ToolCallRecord, ToolCallResultData, ToolEventData, PREAMBLE_TAG,
};
pub use guideline::{Guideline, GuidelineContent, GuidelineMatch, GuidelineMetadata};
pub use journey::{Journey, JourneyEdge, JourneyNode};
pub use provider::{
    AnthropicSchematicGenerator, GenerationHints, OpenAiSchematicGenerator, Schematic,
    SchematicGenerator, TokenUsage,
};
pub use session::{AgentState, Session, SessionMode};
pub use tool::{
    ParameterInsight, Tool, ToolDescriptor, ToolId, ToolInsights, ToolOutcome, ToolParameter,
    ToolRegistry,
};
pub use types::*;
