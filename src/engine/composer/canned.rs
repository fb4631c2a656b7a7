//! Canned-response composition
//!
//! The canned path takes the draft and tries to replace it with (or restyle
//! it after) a pre-authored template: retrieve candidates, resolve each
//! template's fields (standard values → tool-provided values → generative
//! extraction), render, let the model select the best candidate, and — in
//! composited mode — revise the draft in the selected template's style.
//! Strict mode guarantees the outgoing text is a rendered candidate
//! verbatim, falling back to the configured no-match reply.

use crate::agent::CompositionMode;
use crate::canned::{render_template, CannedResponse};
use crate::context::LoadedContext;
use crate::error::Result;
use crate::event::PREAMBLE_TAG;
use crate::guideline::Guideline;
use crate::provider::{generate, GenerationHints, SchematicGenerator, TokenUsage};
use crate::relevance::rank_by_relevance;
use crate::storage::CannedResponseStore;
use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Upper bound on templates considered per turn
pub const MAX_CANDIDATES: usize = 10;

/// How well the selected template covers the draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MatchQuality {
    High,
    Partial,
    None,
}

/// Result schema of the selection stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SelectionResult {
    /// 1-based index into the candidate list; absent when nothing fits
    pub choice: Option<usize>,
    pub match_quality: MatchQuality,
}

/// Result schema of one generative field extraction
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FieldExtraction {
    /// The extracted value; absent when the conversation does not provide it
    pub value: Option<String>,
}

/// Result schema of the revision stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Revision {
    pub revised_message: String,
}

/// Output of the canned pipeline
#[derive(Debug, Clone)]
pub struct CannedOutcome {
    pub final_text: String,
    pub usage: TokenUsage,
}

/// A candidate with its fields resolved and its template rendered
struct RenderedCandidate {
    text: String,
}

/// Run the canned pipeline over a draft
pub(super) async fn compose_canned(
    generator: &dyn SchematicGenerator,
    store: &dyn CannedResponseStore,
    no_match_response: &str,
    context: &LoadedContext,
    draft: &str,
    mode: CompositionMode,
) -> Result<CannedOutcome> {
    let mut usage = TokenUsage::default();

    let rendered = retrieve_and_render(generator, store, context, draft, &mut usage).await?;
    if rendered.is_empty() {
        debug!(mode = ?mode, "No renderable canned candidates");
        return Ok(CannedOutcome {
            final_text: fallback_text(mode, no_match_response, draft),
            usage,
        });
    }

    let selection = select_candidate(generator, draft, &rendered, &mut usage).await;
    let selected = selection.as_ref().and_then(|s| {
        s.choice
            .filter(|choice| (1..=rendered.len()).contains(choice))
            .map(|choice| &rendered[choice - 1])
    });
    let quality = selection
        .as_ref()
        .map(|s| s.match_quality)
        .unwrap_or(MatchQuality::None);

    let final_text = match mode {
        CompositionMode::CannedStrict => match selected {
            Some(candidate) if quality == MatchQuality::High => candidate.text.clone(),
            _ => no_match_response.to_string(),
        },
        CompositionMode::CannedFluid => match selected {
            Some(candidate) if quality == MatchQuality::High => candidate.text.clone(),
            _ => draft.to_string(),
        },
        CompositionMode::CannedComposited => match selected {
            Some(candidate) => {
                revise_draft(generator, draft, &candidate.text, &mut usage).await
            }
            None => draft.to_string(),
        },
        CompositionMode::Fluid => draft.to_string(),
    };

    info!(mode = ?mode, quality = ?quality, "Canned composition complete");
    Ok(CannedOutcome { final_text, usage })
}

fn fallback_text(mode: CompositionMode, no_match_response: &str, draft: &str) -> String {
    match mode {
        CompositionMode::CannedStrict => no_match_response.to_string(),
        _ => draft.to_string(),
    }
}

async fn retrieve_and_render(
    generator: &dyn SchematicGenerator,
    store: &dyn CannedResponseStore,
    context: &LoadedContext,
    draft: &str,
    usage: &mut TokenUsage,
) -> Result<Vec<RenderedCandidate>> {
    let journeys = context
        .current_iteration()
        .map(|i| i.journeys.clone())
        .unwrap_or_default();
    let guidelines: Vec<Guideline> = context
        .all_matches()
        .iter()
        .map(|m| m.guideline.clone())
        .collect();

    let mut candidates = store
        .find_for_context(&context.agent, &journeys, &guidelines)
        .await?;
    candidates.retain(|c| !c.has_tag(PREAMBLE_TAG));

    let tool_fields = tool_fields(context);
    // A template whose standard fields cannot be produced this turn is out
    // before ranking; tool-based and generative fields are checked during
    // resolution.
    candidates.retain(|c| {
        c.fields()
            .iter()
            .all(|field| !field.starts_with("std.") || resolve_std_field(context, field).is_some())
    });

    let ranked = rank_by_relevance(
        draft,
        candidates,
        |c| c.retrieval_texts(),
        0.0,
        MAX_CANDIDATES,
    );

    let resolutions = join_all(
        ranked
            .iter()
            .map(|candidate| resolve_candidate(generator, context, &tool_fields, candidate, draft)),
    )
    .await;

    let mut rendered = Vec::new();
    for (candidate, resolution) in ranked.iter().zip(resolutions) {
        match resolution {
            Ok(Some((values, extraction_usage))) => {
                usage.add(extraction_usage);
                match render_template(&candidate.template, &values) {
                    Ok(text) => rendered.push(RenderedCandidate { text }),
                    Err(err) => {
                        warn!(template_id = %candidate.id, error = %err, "Template failed to render")
                    }
                }
            }
            Ok(None) => {
                debug!(template_id = %candidate.id, "Template discarded: unresolvable field")
            }
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) => {
                warn!(template_id = %candidate.id, error = %err, "Field resolution failed")
            }
        }
    }

    Ok(rendered)
}

fn tool_fields(context: &LoadedContext) -> HashMap<String, serde_json::Value> {
    let mut fields = HashMap::new();
    for event in context.tool_events() {
        if let Some(tool) = event.as_tool() {
            for call in tool.tool_calls {
                fields.extend(call.result.canned_response_fields);
            }
        }
    }
    fields
}

/// Resolve a standard (`std.*`) field from the loaded context
fn resolve_std_field(context: &LoadedContext, field: &str) -> Option<serde_json::Value> {
    match field {
        "std.customer.name" => Some(serde_json::Value::String(context.customer.name.clone())),
        "std.agent.name" => Some(serde_json::Value::String(context.agent.name.clone())),
        "std.missing_params" => {
            let insights = context.tool_insights();
            let parameters: Vec<String> = insights
                .missing_data
                .iter()
                .map(|i| i.parameter.clone())
                .collect();
            Some(serde_json::Value::String(parameters.join(", ")))
        }
        other => {
            let name = other.strip_prefix("std.variables.")?;
            context
                .current_iteration()?
                .context_variables
                .iter()
                .find(|v| v.name == name)
                .map(|v| v.value.clone())
        }
    }
}

/// Resolve every field of one candidate; `None` discards the template
async fn resolve_candidate(
    generator: &dyn SchematicGenerator,
    context: &LoadedContext,
    tool_fields: &HashMap<String, serde_json::Value>,
    candidate: &CannedResponse,
    draft: &str,
) -> Result<Option<(HashMap<String, serde_json::Value>, TokenUsage)>> {
    let mut values = HashMap::new();
    let mut usage = TokenUsage::default();

    for field in candidate.fields() {
        if field.starts_with("std.") {
            match resolve_std_field(context, &field) {
                Some(value) => {
                    values.insert(field, value);
                }
                None => return Ok(None),
            }
        } else if let Some(value) = tool_fields.get(&field) {
            values.insert(field, value.clone());
        } else {
            let prompt = format!(
                "The agent is about to send a reply based on this draft:\n{}\n\n\
                 Conversation so far:\n{}\n\n\
                 Extract the value for the template field '{}' from the draft \
                 and conversation. Leave the value absent if it cannot be \
                 determined from them.",
                draft,
                context.interaction.transcript(),
                field,
            );
            let extraction =
                generate::<FieldExtraction>(generator, &prompt, &GenerationHints::default())
                    .await?;
            usage.add(extraction.usage);
            match extraction.content.value {
                Some(value) => {
                    values.insert(field, serde_json::Value::String(value));
                }
                None => return Ok(None),
            }
        }
    }

    Ok(Some((values, usage)))
}

async fn select_candidate(
    generator: &dyn SchematicGenerator,
    draft: &str,
    rendered: &[RenderedCandidate],
    usage: &mut TokenUsage,
) -> Option<SelectionResult> {
    let listing: Vec<String> = rendered
        .iter()
        .enumerate()
        .map(|(index, c)| format!("{}. {}", index + 1, c.text))
        .collect();

    let prompt = format!(
        "The agent drafted this reply:\n{}\n\nPre-approved responses:\n{}\n\n\
         Pick the response that best conveys the draft's content. Report the \
         match quality: 'high' when the response covers the draft's substance, \
         'partial' when it covers some of it, 'none' when nothing fits (leave \
         the choice absent in that case).",
        draft,
        listing.join("\n"),
    );

    match generate::<SelectionResult>(generator, &prompt, &GenerationHints::default()).await {
        Ok(selection) => {
            usage.add(selection.usage);
            Some(selection.content)
        }
        Err(err) => {
            warn!(error = %err, "Candidate selection failed");
            None
        }
    }
}

async fn revise_draft(
    generator: &dyn SchematicGenerator,
    draft: &str,
    template_text: &str,
    usage: &mut TokenUsage,
) -> String {
    let prompt = format!(
        "Rewrite the draft below in the style, tone and phrasing of the \
         reference response, preserving every fact of the draft.\n\n\
         Draft:\n{}\n\nReference response:\n{}",
        draft, template_text,
    );

    match generate::<Revision>(generator, &prompt, &GenerationHints::default()).await {
        Ok(revision) => {
            usage.add(revision.usage);
            revision.content.revised_message
        }
        Err(err) => {
            warn!(error = %err, "Revision failed; keeping draft");
            draft.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, Customer};
    use crate::context::{Interaction, IterationState};
    use crate::error::EngineError;
    use crate::session::Session;
    use crate::storage::memory::InMemoryCannedResponseStore;
    use crate::types::{AgentId, CustomerId};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedGenerator {
        responses: Mutex<Vec<serde_json::Value>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<serde_json::Value>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
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

    fn context(mode: CompositionMode) -> LoadedContext {
        let mut ctx = LoadedContext::new(
            Session::new(AgentId::new(), CustomerId::new()),
            Agent::new("Support").with_composition_mode(mode),
            Customer::guest(),
            Interaction::default(),
        );
        ctx.iterations.push(IterationState::default());
        ctx
    }

    const NO_MATCH: &str = "I'm not able to help with that.";

    #[tokio::test]
    async fn test_strict_high_quality_is_verbatim() {
        let store = InMemoryCannedResponseStore::new();
        store
            .add(CannedResponse::new("We restock laptops every Monday."))
            .await;

        let generator = ScriptedGenerator::new(vec![
            serde_json::json!({"choice": 1, "match_quality": "high"}),
        ]);
        let ctx = context(CompositionMode::CannedStrict);

        let outcome = compose_canned(
            &generator,
            &store,
            NO_MATCH,
            &ctx,
            "laptops restock on monday",
            CompositionMode::CannedStrict,
        )
        .await
        .unwrap();

        assert_eq!(outcome.final_text, "We restock laptops every Monday.");
    }

    #[tokio::test]
    async fn test_strict_partial_quality_falls_back_to_no_match() {
        let store = InMemoryCannedResponseStore::new();
        store.add(CannedResponse::new("Shipping takes two days.")).await;

        let generator = ScriptedGenerator::new(vec![
            serde_json::json!({"choice": 1, "match_quality": "partial"}),
        ]);
        let ctx = context(CompositionMode::CannedStrict);

        let outcome = compose_canned(
            &generator,
            &store,
            NO_MATCH,
            &ctx,
            "totally unrelated question",
            CompositionMode::CannedStrict,
        )
        .await
        .unwrap();

        assert_eq!(outcome.final_text, NO_MATCH);
    }

    #[tokio::test]
    async fn test_strict_no_candidates_falls_back_to_no_match() {
        let store = InMemoryCannedResponseStore::new();
        let generator = ScriptedGenerator::new(vec![]);
        let ctx = context(CompositionMode::CannedStrict);

        let outcome = compose_canned(
            &generator,
            &store,
            NO_MATCH,
            &ctx,
            "anything",
            CompositionMode::CannedStrict,
        )
        .await
        .unwrap();

        assert_eq!(outcome.final_text, NO_MATCH);
    }

    #[tokio::test]
    async fn test_canned_fluid_falls_back_to_draft() {
        let store = InMemoryCannedResponseStore::new();
        store.add(CannedResponse::new("Canned text.")).await;

        let generator = ScriptedGenerator::new(vec![
            serde_json::json!({"choice": 1, "match_quality": "partial"}),
        ]);
        let ctx = context(CompositionMode::CannedFluid);

        let outcome = compose_canned(
            &generator,
            &store,
            NO_MATCH,
            &ctx,
            "the draft text",
            CompositionMode::CannedFluid,
        )
        .await
        .unwrap();

        assert_eq!(outcome.final_text, "the draft text");
    }

    #[tokio::test]
    async fn test_composited_revises_in_template_style() {
        let store = InMemoryCannedResponseStore::new();
        store
            .add(CannedResponse::new("Thanks for reaching out! ..."))
            .await;

        let generator = ScriptedGenerator::new(vec![
            serde_json::json!({"choice": 1, "match_quality": "partial"}),
            serde_json::json!({"revised_message": "Thanks for reaching out! Laptops are in stock."}),
        ]);
        let ctx = context(CompositionMode::CannedComposited);

        let outcome = compose_canned(
            &generator,
            &store,
            NO_MATCH,
            &ctx,
            "Laptops are in stock.",
            CompositionMode::CannedComposited,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome.final_text,
            "Thanks for reaching out! Laptops are in stock."
        );
    }

    #[tokio::test]
    async fn test_std_field_resolution() {
        let store = InMemoryCannedResponseStore::new();
        store
            .add(CannedResponse::new("Hi {{ std.customer.name }}!"))
            .await;

        let generator = ScriptedGenerator::new(vec![
            serde_json::json!({"choice": 1, "match_quality": "high"}),
        ]);
        let mut ctx = context(CompositionMode::CannedStrict);
        ctx.customer.name = "Dana".to_string();

        let outcome = compose_canned(
            &generator,
            &store,
            NO_MATCH,
            &ctx,
            "greet dana",
            CompositionMode::CannedStrict,
        )
        .await
        .unwrap();

        assert_eq!(outcome.final_text, "Hi Dana!");
    }

    #[tokio::test]
    async fn test_unknown_std_field_discards_template() {
        let store = InMemoryCannedResponseStore::new();
        store
            .add(CannedResponse::new("Value: {{ std.internal.secret }}"))
            .await;

        let generator = ScriptedGenerator::new(vec![]);
        let ctx = context(CompositionMode::CannedStrict);

        let outcome = compose_canned(
            &generator,
            &store,
            NO_MATCH,
            &ctx,
            "anything",
            CompositionMode::CannedStrict,
        )
        .await
        .unwrap();

        // The only template was discarded up front, so strict falls back.
        assert_eq!(outcome.final_text, NO_MATCH);
    }

    #[tokio::test]
    async fn test_generative_field_failure_discards_template() {
        let store = InMemoryCannedResponseStore::new();
        store
            .add(CannedResponse::new("Your order {{ order_number }} shipped."))
            .await;

        let generator = ScriptedGenerator::new(vec![
            // Field extraction cannot find the value.
            serde_json::json!({"value": null}),
        ]);
        let ctx = context(CompositionMode::CannedFluid);

        let outcome = compose_canned(
            &generator,
            &store,
            NO_MATCH,
            &ctx,
            "your order shipped",
            CompositionMode::CannedFluid,
        )
        .await
        .unwrap();

        assert_eq!(outcome.final_text, "your order shipped");
    }
}
