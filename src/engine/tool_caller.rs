//! Tool calling
//!
//! For every tool-enabled guideline match the caller collects candidate
//! tools from the explicit association registries (guideline → tool and
//! journey-node → tool; exact id matches, never semantic), runs one LLM
//! inference per candidate tool to decide applicability and evaluate
//! arguments, and executes the calls that pass the policy. Inference and
//! execution of independent tools run in parallel; each tool's execution
//! starts only after its own inference completed. Results merge
//! deterministically on join, and one tool event goes out per invoked call.

use crate::correlation::CorrelationScope;
use crate::error::{EngineError, Result};
use crate::event::{Event, StatusEventData, ToolCallRecord, ToolEventData};
use crate::guideline::{Guideline, GuidelineMatch};
use crate::provider::{
    generate, with_retries, GenerationHints, SchematicGenerator, TokenUsage,
};
use crate::storage::{GuidelineToolAssociationStore, JourneyNodeToolAssociationStore};
use crate::tool::{ParameterInsight, Tool, ToolId, ToolInsights, ToolRegistry};
use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::emitter::EventEmitter;
use super::matcher::MatchingContext;
use super::tasks::ensure_active;

/// Stage label emitted before tool execution
pub const FETCHING_DATA_STAGE: &str = "Fetching data";

/// Validity of one inferred argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentState {
    Valid,
    Invalid,
    Missing,
}

/// One evaluated argument of a candidate call
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArgumentEvaluation {
    pub parameter_name: String,
    pub state: ArgumentState,
    /// The extracted value, as a string, when state is `valid` or `invalid`
    pub value: Option<String>,
    pub is_optional: bool,
}

/// One intended invocation of the candidate tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InferredToolCall {
    pub applicability_rationale: String,
    pub is_applicable: bool,
    /// Whether an identical call was already staged earlier this cycle
    pub same_call_is_already_staged: bool,
    pub argument_evaluations: Vec<ArgumentEvaluation>,
}

/// Result schema of one per-tool inference
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolInference {
    pub tool_calls_for_candidate_tool: Vec<InferredToolCall>,
}

/// Output of one tool-calling pass
#[derive(Debug, Default)]
pub struct ToolCallerOutput {
    /// Tool events emitted (one per invoked call)
    pub events: Vec<Event>,
    pub insights: ToolInsights,
    pub usage: TokenUsage,
}

struct CandidateTool {
    tool: Arc<dyn Tool>,
    /// (ordinal of the match, guideline) pairs that want this tool
    wanted_by: Vec<(usize, Guideline)>,
}

struct ToolPassResult {
    records: Vec<ToolCallRecord>,
    insights: ToolInsights,
    usage: TokenUsage,
}

/// Per-tool applicability inference, validation and execution
#[derive(Clone)]
pub struct ToolCaller {
    generator: Arc<dyn SchematicGenerator>,
    registry: Arc<ToolRegistry>,
    guideline_associations: Arc<dyn GuidelineToolAssociationStore>,
    node_associations: Arc<dyn JourneyNodeToolAssociationStore>,
}

impl ToolCaller {
    /// Create a tool caller
    pub fn new(
        generator: Arc<dyn SchematicGenerator>,
        registry: Arc<ToolRegistry>,
        guideline_associations: Arc<dyn GuidelineToolAssociationStore>,
        node_associations: Arc<dyn JourneyNodeToolAssociationStore>,
    ) -> Self {
        Self {
            generator,
            registry,
            guideline_associations,
            node_associations,
        }
    }

    /// Which tools the given matches are associated with (registry-enabled
    /// tools only). Exposed so the engine can split ordinary from
    /// tool-enabled matches with the same rules the caller uses.
    pub async fn associated_tools(&self, guideline: &Guideline) -> Result<Vec<ToolId>> {
        let mut tool_ids = Vec::new();

        for association in self.guideline_associations.find_all().await? {
            if association.guideline_id == guideline.id
                && !tool_ids.contains(&association.tool_id)
            {
                tool_ids.push(association.tool_id);
            }
        }

        if let Some(node) = &guideline.metadata.journey_node {
            for tool_id in self.node_associations.find_for_node(&node.node_id).await? {
                if !tool_ids.contains(&tool_id) {
                    tool_ids.push(tool_id);
                }
            }
        }

        let mut enabled = Vec::new();
        for tool_id in tool_ids {
            if self.registry.get(&tool_id).await.is_some() {
                enabled.push(tool_id);
            }
        }
        Ok(enabled)
    }

    /// Infer, validate and execute tool calls for the tool-enabled matches.
    ///
    /// `staged` carries the calls already made in earlier iterations of this
    /// cycle so the model can avoid duplicate side effects.
    pub async fn call_tools(
        &self,
        context: &MatchingContext,
        matches: &[GuidelineMatch],
        staged: &[ToolCallRecord],
        emitter: &dyn EventEmitter,
        scope: &CorrelationScope,
        cancel: &CancellationToken,
    ) -> Result<ToolCallerOutput> {
        let candidates = self.collect_candidates(matches).await?;
        if candidates.is_empty() {
            return Ok(ToolCallerOutput::default());
        }
        ensure_active(cancel, context.session_id)?;

        info!(
            candidate_count = candidates.len(),
            match_count = matches.len(),
            "Running tool inference"
        );
        emitter
            .emit_status(scope, StatusEventData::processing(FETCHING_DATA_STAGE))
            .await?;

        // One pipeline per candidate tool: inference, then execution.
        let results = join_all(
            candidates
                .iter()
                .map(|candidate| self.run_tool_pass(context, candidate, staged)),
        )
        .await;

        ensure_active(cancel, context.session_id)?;

        let mut output = ToolCallerOutput::default();
        for (candidate, result) in candidates.iter().zip(results) {
            match result {
                Ok(pass) => {
                    output.insights.merge(pass.insights);
                    output.usage.add(pass.usage);
                    for record in pass.records {
                        let event = emitter
                            .emit_tool(
                                scope,
                                ToolEventData {
                                    tool_calls: vec![record],
                                },
                            )
                            .await?;
                        output.events.push(event);
                    }
                }
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    warn!(
                        tool_id = %candidate.tool.descriptor().id,
                        error = %err,
                        "Tool inference failed; skipping tool"
                    );
                }
            }
        }

        Ok(output)
    }

    async fn collect_candidates(&self, matches: &[GuidelineMatch]) -> Result<Vec<CandidateTool>> {
        let associations = self.guideline_associations.find_all().await?;
        let mut ordered: Vec<(ToolId, Vec<(usize, Guideline)>)> = Vec::new();

        let mut add = |tool_id: ToolId, ordinal: usize, guideline: &Guideline| {
            match ordered.iter_mut().find(|(id, _)| *id == tool_id) {
                Some((_, wanted)) => wanted.push((ordinal, guideline.clone())),
                None => ordered.push((tool_id, vec![(ordinal, guideline.clone())])),
            }
        };

        for (ordinal, matched) in matches.iter().enumerate() {
            for association in &associations {
                if association.guideline_id == matched.guideline.id {
                    add(association.tool_id.clone(), ordinal, &matched.guideline);
                }
            }
            if let Some(node) = &matched.guideline.metadata.journey_node {
                for tool_id in self.node_associations.find_for_node(&node.node_id).await? {
                    add(tool_id, ordinal, &matched.guideline);
                }
            }
        }

        let mut candidates = Vec::new();
        for (tool_id, wanted_by) in ordered {
            match self.registry.get(&tool_id).await {
                Some(tool) => candidates.push(CandidateTool { tool, wanted_by }),
                None => debug!(tool_id = %tool_id, "Associated tool is not registered"),
            }
        }
        Ok(candidates)
    }

    async fn run_tool_pass(
        &self,
        context: &MatchingContext,
        candidate: &CandidateTool,
        staged: &[ToolCallRecord],
    ) -> Result<ToolPassResult> {
        let descriptor = candidate.tool.descriptor();
        let prompt = inference_prompt(context, candidate, staged);

        let inference = with_retries("tool_inference", |_attempt| {
            let prompt = prompt.clone();
            async move {
                generate::<ToolInference>(
                    self.generator.as_ref(),
                    &prompt,
                    &GenerationHints::default(),
                )
                .await
            }
        })
        .await?;

        let precedence = candidate
            .wanted_by
            .iter()
            .map(|(ordinal, _)| *ordinal)
            .min()
            .unwrap_or(0);

        let mut result = ToolPassResult {
            records: Vec::new(),
            insights: ToolInsights::default(),
            usage: inference.usage,
        };

        for call in inference.content.tool_calls_for_candidate_tool {
            if !call.is_applicable {
                debug!(tool_id = %descriptor.id, "Inferred call not applicable");
                continue;
            }
            if call.same_call_is_already_staged {
                debug!(tool_id = %descriptor.id, "Identical call already staged");
                continue;
            }

            let required = descriptor.required_parameters();
            let mut missing = Vec::new();
            let mut invalid = Vec::new();

            for evaluation in &call.argument_evaluations {
                match evaluation.state {
                    ArgumentState::Missing => {
                        let optional = evaluation.is_optional
                            || !required.contains(evaluation.parameter_name.as_str());
                        if !optional {
                            missing.push(evaluation.parameter_name.clone());
                        }
                    }
                    ArgumentState::Invalid => invalid.push(evaluation.parameter_name.clone()),
                    ArgumentState::Valid => {}
                }
            }

            if !missing.is_empty() || !invalid.is_empty() {
                for parameter in missing {
                    result.insights.missing_data.push(ParameterInsight {
                        tool_id: descriptor.id.clone(),
                        parameter,
                        precedence,
                    });
                }
                for parameter in invalid {
                    result.insights.invalid_data.push(ParameterInsight {
                        tool_id: descriptor.id.clone(),
                        parameter,
                        precedence,
                    });
                }
                continue;
            }

            let arguments: HashMap<String, serde_json::Value> = call
                .argument_evaluations
                .iter()
                .filter(|e| e.state == ArgumentState::Valid)
                .filter_map(|e| {
                    e.value
                        .as_ref()
                        .map(|v| (e.parameter_name.clone(), parse_argument(v)))
                })
                .collect();

            result
                .records
                .push(self.execute_call(candidate, arguments).await);
        }

        Ok(result)
    }

    async fn execute_call(
        &self,
        candidate: &CandidateTool,
        arguments: HashMap<String, serde_json::Value>,
    ) -> ToolCallRecord {
        let descriptor = candidate.tool.descriptor();
        info!(tool_id = %descriptor.id, "Executing tool");

        let execution = with_retries("tool_execution", |_attempt| {
            let tool = candidate.tool.clone();
            let arguments = arguments.clone();
            async move {
                tool.execute(arguments)
                    .await
                    .map_err(EngineError::from)
            }
        })
        .await;

        match execution {
            Ok(outcome) => ToolCallRecord {
                tool_id: descriptor.id.clone(),
                arguments,
                result: outcome.into(),
            },
            Err(err) => {
                warn!(tool_id = %descriptor.id, error = %err, "Tool execution failed");
                ToolCallRecord {
                    tool_id: descriptor.id.clone(),
                    arguments,
                    result: crate::event::ToolCallResultData {
                        data: serde_json::json!({ "error": err.to_string() }),
                        canned_response_fields: HashMap::new(),
                        canned_responses: Vec::new(),
                    },
                }
            }
        }
    }
}

/// Parse an extracted argument string into a JSON value; anything that is
/// not valid JSON stays a string.
fn parse_argument(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn inference_prompt(
    context: &MatchingContext,
    candidate: &CandidateTool,
    staged: &[ToolCallRecord],
) -> String {
    let descriptor = candidate.tool.descriptor();

    let guidelines: Vec<String> = candidate
        .wanted_by
        .iter()
        .map(|(_, g)| {
            format!(
                "- When: {} — then: {}",
                g.content.condition,
                g.content.action.as_deref().unwrap_or_default()
            )
        })
        .collect();

    let parameters: Vec<String> = descriptor
        .parameters
        .iter()
        .map(|(name, p)| {
            format!(
                "- {} ({}, {}): {}",
                name,
                p.param_type,
                if p.required { "required" } else { "optional" },
                p.description
            )
        })
        .collect();

    let staged_section = if staged.is_empty() {
        "No tool calls are staged yet this turn.".to_string()
    } else {
        let listed: Vec<String> = staged
            .iter()
            .map(|record| {
                format!(
                    "- {} with {}",
                    record.tool_id,
                    serde_json::to_string(&record.arguments).unwrap_or_default()
                )
            })
            .collect();
        format!("Tool calls already staged this turn:\n{}", listed.join("\n"))
    };

    format!(
        "{}\n\nActive rules that may need this tool:\n{}\n\nCandidate tool \
         '{}': {}\nParameters:\n{}\n\n{}\n\nDecide whether (and how many \
         times) the candidate tool should be invoked right now. For each \
         intended invocation, evaluate every parameter: state 'valid' with the \
         extracted value, 'invalid' with the problematic value, or 'missing' \
         when the conversation does not provide it. Mark an invocation as \
         already staged when an identical call appears above.",
        context.prompt_header(),
        guidelines.join("\n"),
        descriptor.id,
        descriptor.description,
        parameters.join("\n"),
        staged_section,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, Customer};
    use crate::context::Interaction;
    use crate::error::ToolError;
    use crate::event::EventSource;
    use crate::guideline::GuidelineContent;
    use crate::session::Session;
    use crate::storage::memory::{InMemoryAssociationStore, InMemorySessionStore};
    use crate::storage::SessionStore;
    use crate::tool::{ToolDescriptor, ToolOutcome, ToolParameter};
    use crate::types::{AgentId, CustomerId, SessionId};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::engine::emitter::EventPublisher;

    struct ScriptedGenerator {
        responses: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl SchematicGenerator for ScriptedGenerator {
        async fn generate_value(
            &self,
            _prompt: &str,
            _schema: serde_json::Value,
            _hints: &GenerationHints,
        ) -> Result<(serde_json::Value, TokenUsage)> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(EngineError::Llm("script exhausted".to_string()));
            }
            Ok((responses.remove(0), TokenUsage::default()))
        }

        fn name(&self) -> &str {
            "Scripted"
        }
    }

    struct StockTool {
        descriptor: ToolDescriptor,
        calls: Arc<AtomicUsize>,
        fail_times: usize,
    }

    impl StockTool {
        fn new(calls: Arc<AtomicUsize>, fail_times: usize) -> Self {
            let mut parameters = HashMap::new();
            parameters.insert(
                "products".to_string(),
                ToolParameter::required("Products to check", "array"),
            );
            Self {
                descriptor: ToolDescriptor {
                    id: ToolId::new("inventory", "check_products_availability"),
                    description: "Check product stock".to_string(),
                    parameters,
                },
                calls,
                fail_times,
            }
        }
    }

    #[async_trait]
    impl Tool for StockTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(
            &self,
            arguments: HashMap<String, serde_json::Value>,
        ) -> std::result::Result<ToolOutcome, ToolError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                return Err(ToolError::ExecutionFailed {
                    tool_id: self.descriptor.id.clone(),
                    message: "upstream unavailable".to_string(),
                });
            }
            let mut outcome = ToolOutcome::data(serde_json::json!({
                "available": true,
                "requested": arguments.get("products"),
            }));
            outcome
                .canned_response_fields
                .insert("stock_count".to_string(), serde_json::json!(12));
            Ok(outcome)
        }
    }

    fn context(session_id: SessionId) -> MatchingContext {
        MatchingContext {
            session_id,
            agent: Agent::new("StockKeeper"),
            customer: Customer::guest(),
            interaction: Interaction::default(),
            terms: Vec::new(),
            variables: Vec::new(),
            applied_guideline_ids: HashSet::new(),
            active_journeys: Vec::new(),
            journey_tips: HashMap::new(),
        }
    }

    async fn harness(
        responses: Vec<serde_json::Value>,
        fail_times: usize,
    ) -> (
        ToolCaller,
        MatchingContext,
        GuidelineMatch,
        Arc<InMemorySessionStore>,
        SessionId,
        Arc<AtomicUsize>,
    ) {
        let generator = Arc::new(ScriptedGenerator {
            responses: Mutex::new(responses),
        });
        let registry = Arc::new(ToolRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let tool_id = registry
            .register(Arc::new(StockTool::new(calls.clone(), fail_times)))
            .await
            .unwrap();

        let associations = Arc::new(InMemoryAssociationStore::new());
        let guideline = Guideline::new(GuidelineContent::new(
            "the customer asks about stock",
            "check availability and answer",
        ));
        associations
            .associate_guideline(guideline.id.clone(), tool_id)
            .await;

        let caller = ToolCaller::new(
            generator,
            registry,
            associations.clone(),
            associations,
        );

        let store = Arc::new(InMemorySessionStore::new());
        let session = Session::new(AgentId::new(), CustomerId::new());
        let session_id = store.create_session(session).await.unwrap();

        let matched = GuidelineMatch::new(guideline, 1.0, "stock question");
        (caller, context(session_id), matched, store, session_id, calls)
    }

    fn applicable_inference(products: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "tool_calls_for_candidate_tool": [{
                "applicability_rationale": "customer asked about stock",
                "is_applicable": true,
                "same_call_is_already_staged": false,
                "argument_evaluations": [{
                    "parameter_name": "products",
                    "state": "valid",
                    "value": products.to_string(),
                    "is_optional": false
                }]
            }]
        })
    }

    #[tokio::test]
    async fn test_successful_call_emits_tool_event() {
        let (caller, ctx, matched, store, session_id, calls) =
            harness(vec![applicable_inference(serde_json::json!(["laptop"]))], 0).await;
        let publisher = EventPublisher::new(store.clone(), session_id, EventSource::AiAgent);
        let scope = CorrelationScope::root_with_id("t").push("process");
        let cancel = CancellationToken::new();

        let output = caller
            .call_tools(&ctx, &[matched], &[], &publisher, &scope, &cancel)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(output.events.len(), 1);
        assert!(output.insights.is_empty());

        let tool_data = output.events[0].as_tool().unwrap();
        assert_eq!(tool_data.tool_calls.len(), 1);
        let record = &tool_data.tool_calls[0];
        assert_eq!(
            record.arguments.get("products"),
            Some(&serde_json::json!(["laptop"]))
        );
        assert_eq!(
            record.result.canned_response_fields.get("stock_count"),
            Some(&serde_json::json!(12))
        );

        // Events in the store: processing{Fetching data} then the tool event.
        let events = store
            .list_events(&session_id, &crate::storage::EventFilter::default())
            .await
            .unwrap();
        let status = events[0].as_status().unwrap();
        assert_eq!(status.data.stage.as_deref(), Some(FETCHING_DATA_STAGE));
    }

    #[tokio::test]
    async fn test_missing_required_parameter_skips_execution() {
        let inference = serde_json::json!({
            "tool_calls_for_candidate_tool": [{
                "applicability_rationale": "wants a stock check",
                "is_applicable": true,
                "same_call_is_already_staged": false,
                "argument_evaluations": [{
                    "parameter_name": "products",
                    "state": "missing",
                    "value": null,
                    "is_optional": false
                }]
            }]
        });
        let (caller, ctx, matched, store, session_id, calls) = harness(vec![inference], 0).await;
        let publisher = EventPublisher::new(store, session_id, EventSource::AiAgent);
        let scope = CorrelationScope::root_with_id("t");
        let cancel = CancellationToken::new();

        let output = caller
            .call_tools(&ctx, &[matched], &[], &publisher, &scope, &cancel)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0, "no execution");
        assert!(output.events.is_empty());
        assert_eq!(output.insights.missing_data.len(), 1);
        assert_eq!(output.insights.missing_data[0].parameter, "products");
    }

    #[tokio::test]
    async fn test_staged_call_is_skipped() {
        let inference = serde_json::json!({
            "tool_calls_for_candidate_tool": [{
                "applicability_rationale": "already fetched",
                "is_applicable": true,
                "same_call_is_already_staged": true,
                "argument_evaluations": []
            }]
        });
        let (caller, ctx, matched, store, session_id, calls) = harness(vec![inference], 0).await;
        let publisher = EventPublisher::new(store, session_id, EventSource::AiAgent);
        let scope = CorrelationScope::root_with_id("t");
        let cancel = CancellationToken::new();

        let output = caller
            .call_tools(&ctx, &[matched], &[], &publisher, &scope, &cancel)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(output.events.is_empty());
        assert!(output.insights.is_empty());
    }

    #[tokio::test]
    async fn test_execution_retries_then_succeeds() {
        let (caller, ctx, matched, store, session_id, calls) = harness(
            vec![applicable_inference(serde_json::json!(["laptop"]))],
            2,
        )
        .await;
        let publisher = EventPublisher::new(store, session_id, EventSource::AiAgent);
        let scope = CorrelationScope::root_with_id("t");
        let cancel = CancellationToken::new();

        let output = caller
            .call_tools(&ctx, &[matched], &[], &publisher, &scope, &cancel)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3, "two failures then success");
        assert_eq!(output.events.len(), 1);
        let record = &output.events[0].as_tool().unwrap().tool_calls[0];
        assert!(record.result.data.get("error").is_none());
    }

    #[tokio::test]
    async fn test_execution_failure_still_emits_failed_record() {
        let (caller, ctx, matched, store, session_id, calls) = harness(
            vec![applicable_inference(serde_json::json!(["laptop"]))],
            usize::MAX,
        )
        .await;
        let publisher = EventPublisher::new(store, session_id, EventSource::AiAgent);
        let scope = CorrelationScope::root_with_id("t");
        let cancel = CancellationToken::new();

        let output = caller
            .call_tools(&ctx, &[matched], &[], &publisher, &scope, &cancel)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3, "three attempts");
        assert_eq!(output.events.len(), 1, "failed call still emits its event");
        let record = &output.events[0].as_tool().unwrap().tool_calls[0];
        assert!(record.result.data["error"]
            .as_str()
            .unwrap()
            .contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn test_no_candidates_no_events() {
        let (caller, ctx, _matched, store, session_id, _calls) = harness(vec![], 0).await;
        let publisher = EventPublisher::new(store.clone(), session_id, EventSource::AiAgent);
        let scope = CorrelationScope::root_with_id("t");
        let cancel = CancellationToken::new();

        // A match with no association yields no candidates and no status.
        let unassociated = GuidelineMatch::new(
            Guideline::new(GuidelineContent::new("c", "a")),
            1.0,
            "m",
        );
        let output = caller
            .call_tools(&ctx, &[unassociated], &[], &publisher, &scope, &cancel)
            .await
            .unwrap();

        assert!(output.events.is_empty());
        let events = store
            .list_events(&session_id, &crate::storage::EventFilter::default())
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_parse_argument() {
        assert_eq!(parse_argument("[\"a\"]"), serde_json::json!(["a"]));
        assert_eq!(parse_argument("42"), serde_json::json!(42));
        assert_eq!(parse_argument("true"), serde_json::json!(true));
        assert_eq!(parse_argument("Bangkok"), serde_json::json!("Bangkok"));
    }
}
