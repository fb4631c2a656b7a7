//! The per-session processing engine
//!
//! [`ProcessingEngine::process`] drives one session through a full cycle:
//! Acknowledgement → Preparation (iterative guideline matching and tool
//! calling) → Preamble → Message generation → Post-processing. Every
//! collaborator arrives through [`EngineConfig`]; the engine owns no global
//! state and a cycle's entire working set lives in one [`LoadedContext`]
//! mutated only from the engine's own task.

use crate::agent::Customer;
use crate::context::{Interaction, IterationState, LoadedContext};
use crate::correlation::CorrelationScope;
use crate::error::{EngineError, Result};
use crate::event::{EventSource, StatusEventData, ToolCallRecord};
use crate::guideline::GuidelineMatch;
use crate::journey::Journey;
use crate::provider::SchematicGenerator;
use crate::session::SessionMode;
use crate::storage::{
    AgentStore, CannedResponseStore, CapabilityStore, ContextVariableStore, CustomerStore,
    EventFilter, GlossaryStore, GuidelineStore, GuidelineToolAssociationStore, Inspection,
    JourneyNodeToolAssociationStore, JourneyStore, SessionStore,
};
use crate::tool::ToolRegistry;
use crate::types::{AgentId, GuidelineId, JourneyId, NodeId, SessionId};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod composer;
pub mod emitter;
pub mod hooks;
pub mod matcher;
pub mod tasks;
pub mod tool_caller;

pub use composer::{
    preamble_required, ComposerOutput, MessageComposer, PreambleOutcome, INTERPRETING_STAGE,
};
pub use emitter::{EventBuffer, EventEmitter, EventPublisher};
pub use hooks::{EngineHooks, HookOutcome, NoopHooks};
pub use matcher::{GuidelineMatcher, MatchingContext, MatchingResult, StrategyResolver};
pub use tasks::{
    BackgroundTaskService, CancellationSuppressionLatch, DEFAULT_PROCESS_TIMEOUT,
};
pub use tool_caller::{ToolCaller, FETCHING_DATA_STAGE};

use composer::preamble::run_preamble;
use tasks::ensure_active;

/// Tunable engine behavior
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Whether preamble generation may run at all
    pub preamble_enabled: bool,
    /// Strict-mode reply when no template matches well enough
    pub no_match_response: String,
    /// Journeys considered per iteration
    pub max_relevant_journeys: usize,
    /// Glossary terms loaded per refresh
    pub max_glossary_terms: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            preamble_enabled: true,
            no_match_response:
                "I'm afraid I can't help with that as of now. Is there anything else I can do \
                 for you?"
                    .to_string(),
            max_relevant_journeys: 3,
            max_glossary_terms: 10,
        }
    }
}

/// Everything a processing engine collaborates with
pub struct EngineConfig {
    pub session_store: Arc<dyn SessionStore>,
    pub agent_store: Arc<dyn AgentStore>,
    pub customer_store: Arc<dyn CustomerStore>,
    pub guideline_store: Arc<dyn GuidelineStore>,
    pub journey_store: Arc<dyn JourneyStore>,
    pub canned_store: Arc<dyn CannedResponseStore>,
    pub variable_store: Arc<dyn ContextVariableStore>,
    pub glossary_store: Arc<dyn GlossaryStore>,
    pub capability_store: Arc<dyn CapabilityStore>,
    pub guideline_tool_associations: Arc<dyn GuidelineToolAssociationStore>,
    pub node_tool_associations: Arc<dyn JourneyNodeToolAssociationStore>,
    pub tool_registry: Arc<ToolRegistry>,
    pub generator: Arc<dyn SchematicGenerator>,
    pub hooks: Arc<dyn EngineHooks>,
    pub settings: EngineSettings,
}

/// Per-session dialog pipeline scheduler
pub struct ProcessingEngine {
    config: EngineConfig,
    matcher: GuidelineMatcher,
    tool_caller: ToolCaller,
    composer: MessageComposer,
}

impl ProcessingEngine {
    /// Build the engine and its subsystems from a config
    pub fn new(config: EngineConfig) -> Self {
        let matcher = GuidelineMatcher::new(config.generator.clone());
        let tool_caller = ToolCaller::new(
            config.generator.clone(),
            config.tool_registry.clone(),
            config.guideline_tool_associations.clone(),
            config.node_tool_associations.clone(),
        );
        let composer = MessageComposer::new(
            config.generator.clone(),
            config.canned_store.clone(),
            config.settings.no_match_response.clone(),
        );
        Self {
            config,
            matcher,
            tool_caller,
            composer,
        }
    }

    /// Build the engine with a custom matching-strategy resolver
    pub fn with_resolver(config: EngineConfig, resolver: StrategyResolver) -> Self {
        let mut engine = Self::new(config);
        engine.matcher =
            GuidelineMatcher::with_resolver(engine.config.generator.clone(), resolver);
        engine
    }

    /// Run one processing cycle for a session.
    ///
    /// Returns `true` when the cycle reached terminal emission and `false`
    /// when it was cancelled or bailed before that. Cancellation is silent:
    /// no `ready`, no `error`.
    pub async fn process(
        &self,
        scope: &CorrelationScope,
        session_id: SessionId,
        agent_id: AgentId,
        emitter: Arc<dyn EventEmitter>,
        cancel: CancellationToken,
    ) -> Result<bool> {
        match self
            .process_inner(scope, session_id, agent_id, emitter, cancel)
            .await
        {
            Ok(completed) => Ok(completed),
            Err(err) if err.is_cancellation() => {
                info!(session_id = %session_id, "Processing cycle cancelled");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// [`Self::process`] bounded by a deadline. On expiry the cycle's token
    /// is cancelled, an `error` status is recorded, and `Timeout` surfaces
    /// to the caller.
    pub async fn process_with_timeout(
        &self,
        scope: &CorrelationScope,
        session_id: SessionId,
        agent_id: AgentId,
        emitter: Arc<dyn EventEmitter>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<bool> {
        let attempt = self.process(scope, session_id, agent_id, emitter.clone(), cancel.clone());
        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session_id = %session_id, timeout_secs = timeout.as_secs(), "Processing timed out");
                cancel.cancel();
                let _ = emitter
                    .emit_status(scope, StatusEventData::error("processing timed out"))
                    .await;
                Err(EngineError::Timeout(session_id))
            }
        }
    }

    /// Start a background cycle for the session, cancelling any in-flight
    /// one. Pushes `::process` onto the scope, the way external dispatch is
    /// expected to.
    pub async fn dispatch(
        self: &Arc<Self>,
        tasks: &BackgroundTaskService,
        scope: &CorrelationScope,
        session_id: SessionId,
        agent_id: AgentId,
    ) -> CancellationToken {
        let engine = Arc::clone(self);
        let scope = scope.push("process");
        tasks
            .dispatch(session_id, move |token| async move {
                let emitter = Arc::new(EventPublisher::new(
                    engine.config.session_store.clone(),
                    session_id,
                    EventSource::AiAgent,
                ));
                match engine
                    .process(&scope, session_id, agent_id, emitter, token)
                    .await
                {
                    Ok(completed) => {
                        debug!(session_id = %session_id, completed, "Processing task finished")
                    }
                    Err(err) => {
                        error!(session_id = %session_id, error = %err, "Processing task failed")
                    }
                }
            })
            .await
    }

    async fn process_inner(
        &self,
        scope: &CorrelationScope,
        session_id: SessionId,
        agent_id: AgentId,
        emitter: Arc<dyn EventEmitter>,
        cancel: CancellationToken,
    ) -> Result<bool> {
        // Stage 1: load the working set.
        let session = self.config.session_store.read_session(&session_id).await?;
        if !session.is_automatic() {
            debug!(session_id = %session_id, "Manual session; engine performs no work");
            return Ok(true);
        }

        let agent = self.config.agent_store.read_agent(&agent_id).await?;
        let customer = match self
            .config
            .customer_store
            .read_customer(&session.customer_id)
            .await
        {
            Ok(customer) => customer,
            Err(err) => {
                debug!(error = %err, "Customer not found; using guest identity");
                Customer::guest()
            }
        };
        let events = self
            .config
            .session_store
            .list_events(&session_id, &EventFilter::default())
            .await?;
        let mut context =
            LoadedContext::new(session, agent, customer, Interaction::new(events));

        ensure_active(&cancel, session_id)?;
        info!(
            session_id = %session_id,
            agent = %context.agent.name,
            event_count = context.interaction.events.len(),
            "Processing cycle started"
        );

        // Stages 2–5: acknowledgement.
        let hooks = self.config.hooks.clone();
        if hooks.on_acknowledging(&context).await.is_bail() {
            return Ok(false);
        }
        emitter
            .emit_status(scope, StatusEventData::acknowledged())
            .await?;
        if hooks.on_acknowledged(&context).await.is_bail() {
            return Ok(false);
        }
        if hooks.on_preparing(&context).await.is_bail() {
            return Ok(false);
        }

        // Stages 6–7: preparation loop.
        let mut preamble_task: Option<JoinHandle<Result<PreambleOutcome>>> = None;
        while !context.prepared_to_respond {
            ensure_active(&cancel, session_id)?;

            if context.iterations.is_empty()
                && self.config.settings.preamble_enabled
                && preamble_required(&context.interaction)
            {
                preamble_task = Some(tokio::spawn(run_preamble(
                    self.config.generator.clone(),
                    self.config.canned_store.clone(),
                    context.clone(),
                    hooks.clone(),
                    emitter.clone(),
                    scope.clone(),
                )));
            }

            if hooks.on_preparation_iteration_start(&context).await.is_bail() {
                break;
            }

            if let Err(err) = self
                .run_preparation_iteration(&mut context, &emitter, scope, &cancel)
                .await
            {
                if err.is_cancellation() {
                    return Err(err);
                }
                // A failed iteration never blocks the reply; respond with
                // whatever state has been accumulated.
                warn!(
                    session_id = %session_id,
                    correlation_id = %scope,
                    error = %err,
                    "Preparation iteration failed; proceeding to respond"
                );
                context.prepared_to_respond = true;
            }

            if let Some(task) = preamble_task.take() {
                match task.await {
                    Ok(Ok(PreambleOutcome::Bailed)) => break,
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => warn!(error = %err, "Preamble task failed"),
                    Err(err) => warn!(error = %err, "Preamble task panicked"),
                }
            }

            self.apply_requested_mode_change(&mut context).await;

            if hooks.on_preparation_iteration_end(&context).await.is_bail() {
                break;
            }

            if let Some(iteration) = context.iterations.last() {
                let converged =
                    iteration.tool_events.is_empty() && iteration.matched_guidelines.is_empty();
                if converged || context.iterations.len() >= context.agent.max_engine_iterations {
                    context.prepared_to_respond = true;
                }
            }
        }

        // Stage 8.
        if hooks.on_generating_messages(&context).await.is_bail() {
            return Ok(false);
        }
        ensure_active(&cancel, session_id)?;

        // Stages 9–10: generation under the cancellation-suppression latch.
        // Once a typing indicator may have been shown, a reply or an
        // explicit error must follow; cancellation waits until after.
        let latch = CancellationSuppressionLatch::new(cancel.clone());
        let (generation, cancelled_during_generation) = latch
            .shield(self.composer.generate_messages(
                &context,
                hooks.as_ref(),
                emitter.as_ref(),
                scope,
            ))
            .await;

        let output = match generation {
            Ok(output) => output,
            Err(err) => {
                error!(
                    session_id = %session_id,
                    correlation_id = %scope,
                    error = %err,
                    "Message generation failed"
                );
                let _ = emitter
                    .emit_status(scope, StatusEventData::error(err.to_string()))
                    .await;
                return Ok(false);
            }
        };

        // Stage 11: the composer emits `ready` after each chunk; a cycle
        // that produced no message still terminates with one.
        if output.messages.is_empty() {
            emitter.emit_status(scope, StatusEventData::ready()).await?;
        }
        if cancelled_during_generation {
            debug!(session_id = %session_id, "Cancellation deferred past message generation");
        }

        // Stage 12: post-processing runs detached so the user is unblocked.
        self.spawn_post_processing(context, output, scope.clone());

        Ok(true)
    }

    /// One preparation iteration: match guidelines and journeys, refresh the
    /// glossary, split matches, call tools, merge results.
    async fn run_preparation_iteration(
        &self,
        context: &mut LoadedContext,
        emitter: &Arc<dyn EventEmitter>,
        scope: &CorrelationScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let iteration_index = context.iterations.len();
        let scope = scope.push("prepare");
        let mut iteration = IterationState::default();

        debug!(iteration = iteration_index, "Preparation iteration started");

        iteration.context_variables = self
            .config
            .variable_store
            .read_variables(&context.agent.id, &context.customer.id)
            .await?;
        iteration.capabilities = self
            .config
            .capability_store
            .find_capabilities(&context.agent.id)
            .await?;

        let query = context.interaction.last_customer_message().unwrap_or_default();

        let journeys = self
            .config
            .journey_store
            .find_relevant(&query, &[], self.config.settings.max_relevant_journeys)
            .await?;
        iteration.journeys = journeys.clone();

        iteration.glossary_terms = self
            .config
            .glossary_store
            .find_relevant(&query, self.config.settings.max_glossary_terms)
            .await?;

        let mut guidelines = self
            .config
            .guideline_store
            .list_guidelines(&context.agent.tags)
            .await?;
        for journey in &journeys {
            guidelines.extend(journey.project_guidelines());
        }

        let matching_context = self.matching_context(context, &iteration, &journeys);
        let matching = self
            .matcher
            .match_guidelines(&matching_context, guidelines, cancel)
            .await?;

        // Iterations past the first only act on guidelines newly activated
        // by this cycle's tool results.
        let previously_matched: HashSet<GuidelineId> =
            context.matched_guideline_ids().into_iter().collect();
        iteration.matched_guidelines = matching
            .matches
            .into_iter()
            .filter(|m| !previously_matched.contains(&m.guideline.id))
            .collect();

        for matched in &iteration.matched_guidelines {
            let tools = self.tool_caller.associated_tools(&matched.guideline).await?;
            if tools.is_empty() {
                iteration.ordinary_matches.push(matched.clone());
            } else {
                iteration.tool_enabled_matches.push(matched.clone());
            }
        }

        let staged: Vec<ToolCallRecord> = context
            .tool_events()
            .iter()
            .filter_map(|e| e.as_tool())
            .flat_map(|t| t.tool_calls)
            .collect();

        let tool_output = self
            .tool_caller
            .call_tools(
                &matching_context,
                &iteration.tool_enabled_matches,
                &staged,
                emitter.as_ref(),
                &scope,
                cancel,
            )
            .await?;
        iteration.tool_insights = tool_output.insights;
        iteration.tool_events = tool_output.events;

        // Second glossary refresh: tool output may have introduced terms.
        if !iteration.tool_events.is_empty() {
            let tool_text: Vec<String> = iteration
                .tool_events
                .iter()
                .filter_map(|e| e.as_tool())
                .flat_map(|t| t.tool_calls)
                .map(|c| c.result.data.to_string())
                .collect();
            iteration.glossary_terms = self
                .config
                .glossary_store
                .find_relevant(
                    &format!("{} {}", query, tool_text.join(" ")),
                    self.config.settings.max_glossary_terms,
                )
                .await?;
        }

        for journey in &journeys {
            let step = iteration
                .matched_guidelines
                .iter()
                .find(|m| m.journey_id() == Some(journey.id))
                .map(|m| m.guideline.id.clone());
            iteration.journey_steps.insert(journey.id, step);
        }

        debug!(
            iteration = iteration_index,
            matches = iteration.matched_guidelines.len(),
            tool_events = iteration.tool_events.len(),
            "Preparation iteration finished"
        );

        context.iterations.push(iteration);
        Ok(())
    }

    /// Snapshot handed to the matcher and tool caller for one iteration
    fn matching_context(
        &self,
        context: &LoadedContext,
        iteration: &IterationState,
        journeys: &[Journey],
    ) -> MatchingContext {
        // The matcher sees the stored history plus any tool events staged
        // earlier in this cycle.
        let mut interaction = context.interaction.clone();
        interaction
            .events
            .extend(context.tool_events().into_iter().cloned());

        let mut journey_tips: HashMap<JourneyId, Option<NodeId>> = HashMap::new();
        for journey in journeys {
            journey_tips.insert(journey.id, self.journey_tip(context, &journey.id));
        }

        MatchingContext {
            session_id: context.session.id,
            agent: context.agent.clone(),
            customer: context.customer.clone(),
            interaction,
            terms: iteration.glossary_terms.clone(),
            variables: iteration.context_variables.clone(),
            applied_guideline_ids: context
                .session
                .latest_agent_state()
                .applied_guideline_ids
                .clone(),
            active_journeys: journeys.to_vec(),
            journey_tips,
        }
    }

    /// The node a journey currently stands on: the newest step selected this
    /// cycle, else the tip recorded in the session's last agent state
    fn journey_tip(&self, context: &LoadedContext, journey_id: &JourneyId) -> Option<NodeId> {
        for iteration in context.iterations.iter().rev() {
            if let Some(Some(step)) = iteration.journey_steps.get(journey_id) {
                return step.journey_node_parts().map(|(node, _)| node);
            }
        }
        context
            .session
            .latest_agent_state()
            .current_path_tip(journey_id)
            .and_then(|id| id.journey_node_parts())
            .map(|(node, _)| node)
    }

    /// Tools may request a session-mode change via a `control.mode` field in
    /// their result data (e.g. handing the conversation to a human).
    async fn apply_requested_mode_change(&self, context: &mut LoadedContext) {
        let requested = context
            .iterations
            .last()
            .into_iter()
            .flat_map(|i| i.tool_events.iter())
            .filter_map(|e| e.as_tool())
            .flat_map(|t| t.tool_calls)
            .filter_map(|c| {
                c.result.data.get("control")?.get("mode")?.as_str().map(str::to_string)
            })
            .last();

        let mode = match requested.as_deref() {
            Some("manual") => SessionMode::Manual,
            Some("auto") => SessionMode::Auto,
            _ => return,
        };

        if context.session.mode == mode {
            return;
        }
        info!(session_id = %context.session.id, mode = ?mode, "Tool requested session mode change");
        context.session.mode = mode;
        if let Err(err) = self
            .config
            .session_store
            .update_session(context.session.clone())
            .await
        {
            warn!(error = %err, "Failed to persist session mode change");
        }
    }

    /// Inspection persistence, response analysis and agent-state append run
    /// after `ready`, detached from the user-visible path. Failures here are
    /// logged and never surface.
    fn spawn_post_processing(
        &self,
        context: LoadedContext,
        output: ComposerOutput,
        scope: CorrelationScope,
    ) {
        let matcher = self.matcher.clone();
        let session_store = self.config.session_store.clone();
        let hooks = self.config.hooks.clone();
        let last_iteration = context.iterations.last().cloned().unwrap_or_default();
        let journeys = last_iteration.journeys.clone();
        let matching_context = self.matching_context(&context, &last_iteration, &journeys);

        tokio::spawn(async move {
            if let Err(err) = post_process(
                matcher,
                session_store,
                hooks,
                matching_context,
                context,
                output,
                scope,
            )
            .await
            {
                warn!(error = %err, "Post-processing failed");
            }
        });
    }
}

async fn post_process(
    matcher: GuidelineMatcher,
    session_store: Arc<dyn SessionStore>,
    hooks: Arc<dyn EngineHooks>,
    matching_context: MatchingContext,
    context: LoadedContext,
    output: ComposerOutput,
    scope: CorrelationScope,
) -> Result<()> {
    let session_id = context.session.id;

    session_store
        .create_inspection(Inspection {
            session_id,
            correlation_id: scope.as_str().to_string(),
            created_at: Utc::now(),
            iterations: context.iterations.clone(),
        })
        .await?;

    let all_matches: Vec<GuidelineMatch> =
        context.all_matches().into_iter().cloned().collect();
    let reply = output.reply_text();
    let analysis = if reply.is_empty() || all_matches.is_empty() {
        Default::default()
    } else {
        matcher
            .analyze_response(&matching_context, &all_matches, &reply)
            .await?
    };

    // Re-read: a tool may have switched the session mode mid-cycle.
    let mut session = session_store.read_session(&session_id).await?;
    let mut state = session.latest_agent_state();
    state
        .applied_guideline_ids
        .extend(analysis.applied_guideline_ids);
    for iteration in &context.iterations {
        for (journey_id, step) in &iteration.journey_steps {
            state
                .journey_paths
                .entry(*journey_id)
                .or_default()
                .push(step.clone());
        }
    }
    session.push_agent_state(state);
    session_store.update_session(session).await?;

    let events = session_store
        .list_events(&session_id, &EventFilter::default())
        .await?;
    hooks.on_messages_emitted(&context, &events).await;

    info!(session_id = %session_id, "Post-processing complete");
    Ok(())
}
