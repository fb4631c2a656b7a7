//! Message composition
//!
//! The composer turns the prepared context into one or more outgoing agent
//! messages. The fluid path generates free text; the canned paths
//! (strict/composited/canned-fluid) route the draft through template
//! retrieval, field resolution, selection and (for composited) revision.
//! The final text splits on blank lines into chunks emitted with paced
//! inter-message delays: `typing` before a chunk, `ready` after it, so the
//! user can interject between chunks.

use crate::agent::CompositionMode;
use crate::context::LoadedContext;
use crate::correlation::CorrelationScope;
use crate::error::Result;
use crate::event::{Event, MessageEventData, StatusEventData};
use crate::provider::{SchematicGenerator, TokenUsage};
use crate::storage::CannedResponseStore;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::emitter::EventEmitter;
use super::hooks::EngineHooks;

pub mod canned;
pub mod fluid;
pub mod preamble;

pub use preamble::{preamble_required, PreambleOutcome, INTERPRETING_STAGE};

/// Words-per-second reading speed used by the pacing formulas
const WORDS_PER_SECOND: f64 = 50.0 / 60.0;

/// Reply text produced by a generation attempt
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageDraft {
    pub message: String,
}

/// Output of one composition pass
#[derive(Debug, Default)]
pub struct ComposerOutput {
    /// Message events emitted, in order
    pub messages: Vec<Event>,
    pub usage: TokenUsage,
}

impl ComposerOutput {
    /// The emitted reply as one string (chunks joined by blank lines)
    pub fn reply_text(&self) -> String {
        self.messages
            .iter()
            .filter_map(|e| e.as_message())
            .map(|m| m.message)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Composes and emits the final reply
#[derive(Clone)]
pub struct MessageComposer {
    generator: Arc<dyn SchematicGenerator>,
    canned_store: Arc<dyn CannedResponseStore>,
    /// Reply used by strict mode when no template matches well enough
    no_match_response: String,
}

impl MessageComposer {
    /// Create a composer
    pub fn new(
        generator: Arc<dyn SchematicGenerator>,
        canned_store: Arc<dyn CannedResponseStore>,
        no_match_response: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            canned_store,
            no_match_response: no_match_response.into(),
        }
    }

    /// The strict-mode fallback reply
    pub fn no_match_response(&self) -> &str {
        &self.no_match_response
    }

    /// Generate the reply for the prepared context and emit it in paced
    /// chunks. Returns the emitted message events.
    pub async fn generate_messages(
        &self,
        context: &LoadedContext,
        hooks: &dyn EngineHooks,
        emitter: &dyn EventEmitter,
        scope: &CorrelationScope,
    ) -> Result<ComposerOutput> {
        let scope = scope.push("generate_message");
        let mut usage = TokenUsage::default();

        let draft = fluid::generate_draft(self.generator.as_ref(), context).await?;
        usage.add(draft.usage);
        let draft_text = draft.content.message;

        let (final_text, draft_field) = match context.agent.composition_mode {
            CompositionMode::Fluid => (draft_text, None),
            mode => {
                let outcome = canned::compose_canned(
                    self.generator.as_ref(),
                    self.canned_store.as_ref(),
                    &self.no_match_response,
                    context,
                    &draft_text,
                    mode,
                )
                .await?;
                usage.add(outcome.usage);
                (outcome.final_text, Some(draft_text))
            }
        };

        info!(
            mode = ?context.agent.composition_mode,
            length = final_text.len(),
            "Reply composed"
        );

        let messages = self
            .emit_paced(context, hooks, emitter, &scope, &final_text, draft_field)
            .await?;

        Ok(ComposerOutput { messages, usage })
    }

    async fn emit_paced(
        &self,
        context: &LoadedContext,
        hooks: &dyn EngineHooks,
        emitter: &dyn EventEmitter,
        scope: &CorrelationScope,
        text: &str,
        draft: Option<String>,
    ) -> Result<Vec<Event>> {
        // Fallback canned responses offered by tools this cycle ride along
        // on the message events.
        let canned_responses: Vec<String> = context
            .tool_events()
            .iter()
            .filter_map(|e| e.as_tool())
            .flat_map(|t| t.tool_calls)
            .flat_map(|c| c.result.canned_responses)
            .collect();

        let chunks: Vec<String> = text
            .split("\n\n")
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let mut emitted = Vec::new();
        let mut previous_words: Option<usize> = None;

        for chunk in chunks {
            if hooks.on_message_generated(context, &chunk).await.is_bail() {
                debug!("Hook dropped a generated chunk");
                continue;
            }

            let words = chunk.split_whitespace().count();
            match previous_words {
                None => {
                    emitter.emit_status(scope, StatusEventData::typing()).await?;
                }
                Some(sent) => {
                    tokio::time::sleep(inter_chunk_delay(sent)).await;
                    emitter.emit_status(scope, StatusEventData::typing()).await?;
                    tokio::time::sleep(pre_chunk_delay(words)).await;
                }
            }

            let mut data = MessageEventData::new(chunk, context.agent.participant());
            data.draft = draft.clone();
            data.canned_responses = canned_responses.clone();

            let event = emitter.emit_message(scope, data).await?;
            emitted.push(event);
            emitter.emit_status(scope, StatusEventData::ready()).await?;

            previous_words = Some(words);
        }

        Ok(emitted)
    }
}

/// Pause after a chunk went out, proportional to its reading time
pub fn inter_chunk_delay(words_sent: usize) -> Duration {
    let seconds = (words_sent as f64 / WORDS_PER_SECOND / 60.0).max(0.5);
    Duration::from_secs_f64(seconds)
}

/// Pause before the next chunk goes out: a base depending on its size plus
/// its reading time
pub fn pre_chunk_delay(next_words: usize) -> Duration {
    let base = if next_words <= 10 { 1.0 } else { 2.0 };
    Duration::from_secs_f64(base + next_words as f64 / WORDS_PER_SECOND / 60.0)
}

/// Prompt shared by the draft stage of every composition mode
pub(crate) fn draft_prompt(context: &LoadedContext) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        "You are composing the next reply from agent '{}' to customer '{}'.{}",
        context.agent.name,
        context.customer.name,
        context
            .agent
            .description
            .as_deref()
            .map(|d| format!(" Agent role: {d}"))
            .unwrap_or_default(),
    ));

    sections.push(format!(
        "Conversation so far:\n{}",
        context.interaction.transcript()
    ));

    let ordinary = context.ordinary_matches();
    let tool_enabled = context.tool_enabled_matches();
    if !ordinary.is_empty() || !tool_enabled.is_empty() {
        let rules: Vec<String> = ordinary
            .iter()
            .chain(tool_enabled.iter())
            .filter_map(|m| m.guideline.content.action.as_deref())
            .filter(|a| !a.trim().is_empty())
            .map(|a| format!("- {a}"))
            .collect();
        if !rules.is_empty() {
            sections.push(format!("Apply these behavioral rules:\n{}", rules.join("\n")));
        }
    }

    let tool_results: Vec<String> = context
        .tool_events()
        .iter()
        .filter_map(|e| e.as_tool())
        .flat_map(|t| t.tool_calls)
        .map(|c| {
            format!(
                "- {}",
                serde_json::to_string(&c.result.data).unwrap_or_else(|_| "{}".to_string())
            )
        })
        .collect();
    if !tool_results.is_empty() {
        sections.push(format!(
            "Data retrieved for this turn:\n{}",
            tool_results.join("\n")
        ));
    }

    if let Some(iteration) = context.current_iteration() {
        if !iteration.glossary_terms.is_empty() {
            let glossary: Vec<String> = iteration
                .glossary_terms
                .iter()
                .map(|t| format!("- {}: {}", t.name, t.description))
                .collect();
            sections.push(format!("Domain glossary:\n{}", glossary.join("\n")));
        }

        if !iteration.capabilities.is_empty() {
            let capabilities: Vec<String> = iteration
                .capabilities
                .iter()
                .map(|c| format!("- {}: {}", c.title, c.description))
                .collect();
            sections.push(format!(
                "You are able to:\n{}",
                capabilities.join("\n")
            ));
        }

        if !iteration.context_variables.is_empty() {
            let variables: Vec<String> = iteration
                .context_variables
                .iter()
                .map(|v| format!("- {} = {}", v.name, v.value))
                .collect();
            sections.push(format!("Known customer context:\n{}", variables.join("\n")));
        }
    }

    let insights = context.tool_insights();
    if !insights.missing_data.is_empty() {
        let parameters: Vec<String> = insights
            .missing_data
            .iter()
            .map(|i| format!("- {}", i.parameter))
            .collect();
        sections.push(format!(
            "You could not look up everything the customer asked for because \
             the following details are missing. Ask the customer for them:\n{}",
            parameters.join("\n")
        ));
    }
    if !insights.invalid_data.is_empty() {
        let parameters: Vec<String> = insights
            .invalid_data
            .iter()
            .map(|i| format!("- {}", i.parameter))
            .collect();
        sections.push(format!(
            "The following details the customer gave look invalid. Ask the \
             customer to clarify them:\n{}",
            parameters.join("\n")
        ));
    }

    sections.push(
        "Write the reply as the agent would: natural, concise, grounded only in \
         the data above. Separate independent thoughts with a blank line. Never \
         mention internal tool names, rule texts, or correlation identifiers."
            .to_string(),
    );

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inter_chunk_delay_floor() {
        assert_eq!(inter_chunk_delay(0), Duration::from_secs_f64(0.5));
        assert_eq!(inter_chunk_delay(10), Duration::from_secs_f64(0.5));
    }

    #[test]
    fn test_inter_chunk_delay_scales_with_words() {
        assert_eq!(inter_chunk_delay(100), Duration::from_secs_f64(2.0));
    }

    #[test]
    fn test_pre_chunk_delay_base() {
        let short = pre_chunk_delay(5);
        let long = pre_chunk_delay(25);
        assert!(short >= Duration::from_secs_f64(1.0));
        assert!(short < Duration::from_secs_f64(1.2));
        assert!(long >= Duration::from_secs_f64(2.0));
    }
}
