//! Preamble generation
//!
//! A preamble is a short bridging message ("Let me look into that...")
//! emitted before any real work to mask latency. The perceived-performance
//! policy decides whether one is warranted; generation waits a moment so
//! the preamble feels typed rather than scripted, and a second pause
//! separates it from the first `processing` status.

use crate::agent::CompositionMode;
use crate::canned::render_template;
use crate::context::{Interaction, LoadedContext};
use crate::correlation::CorrelationScope;
use crate::error::Result;
use crate::event::{MessageEventData, StatusEventData, PREAMBLE_TAG};
use crate::provider::{generate, GenerationHints, SchematicGenerator};
use crate::storage::CannedResponseStore;
use rand::seq::SliceRandom;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::emitter::EventEmitter;
use crate::engine::hooks::EngineHooks;

use super::MessageDraft;

/// Stage label of the first `processing` status after the preamble
pub const INTERPRETING_STAGE: &str = "Interpreting";

/// Up to this many prior wait cycles, a preamble is always warranted
const MAX_PRIOR_WAIT_CYCLES: usize = 2;

/// A wait this long (seconds) still justifies a preamble later on
const SLOW_WAIT_SECONDS: f64 = 5.0;

/// Phrases shown to the model as style exemplars in non-strict modes
const EXEMPLARS: [&str; 4] = [
    "Let me look into that...",
    "One moment while I check.",
    "Give me a second to pull that up.",
    "Checking that for you now.",
];

/// Whether the perceived-performance policy calls for a preamble.
///
/// Required iff the last agent message was not itself a preamble, and either
/// the customer has waited at most twice before, or the last two waits were
/// both slow.
pub fn preamble_required(interaction: &Interaction) -> bool {
    let last_was_preamble = interaction
        .last_agent_message()
        .map(|m| m.is_preamble())
        .unwrap_or(false);
    if last_was_preamble {
        return false;
    }

    let waits = interaction.previous_wait_times();
    if waits.len() <= MAX_PRIOR_WAIT_CYCLES {
        return true;
    }
    waits.iter().rev().take(2).all(|w| *w >= SLOW_WAIT_SECONDS)
}

/// How a preamble attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreambleOutcome {
    /// A preamble message went out
    Emitted,
    /// Nothing suitable to emit; the cycle carries on
    Skipped,
    /// A hook bailed; the cycle should stop preparing
    Bailed,
}

/// Result schema of the strict-mode template choice
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct PreambleChoice {
    /// 1-based index into the listed templates
    choice: usize,
}

/// Generate and emit at most one preamble message, then the first
/// `processing` status.
pub async fn run_preamble(
    generator: Arc<dyn SchematicGenerator>,
    canned_store: Arc<dyn CannedResponseStore>,
    context: LoadedContext,
    hooks: Arc<dyn EngineHooks>,
    emitter: Arc<dyn EventEmitter>,
    scope: CorrelationScope,
) -> Result<PreambleOutcome> {
    let scope = scope.push("preamble");

    let initial_delay = {
        let mut rng = rand::thread_rng();
        Duration::from_secs_f64(rng.gen_range(1.5..2.0))
    };
    tokio::time::sleep(initial_delay).await;

    let text = match context.agent.composition_mode {
        CompositionMode::CannedStrict => {
            strict_preamble(generator.as_ref(), canned_store.as_ref(), &context).await
        }
        _ => fluid_preamble(generator.as_ref(), &context).await,
    };

    let text = match text {
        Some(text) => text,
        None => {
            debug!("No preamble produced; skipping");
            return Ok(PreambleOutcome::Skipped);
        }
    };

    if hooks.on_message_generated(&context, &text).await.is_bail() {
        return Ok(PreambleOutcome::Bailed);
    }

    let mut data = MessageEventData::new(text, context.agent.participant());
    data.tags.push(PREAMBLE_TAG.to_string());
    emitter.emit_message(&scope, data).await?;

    let settle_delay = {
        let mut rng = rand::thread_rng();
        Duration::from_secs_f64(rng.gen_range(0.5..1.5))
    };
    tokio::time::sleep(settle_delay).await;

    emitter
        .emit_status(&scope, StatusEventData::processing(INTERPRETING_STAGE))
        .await?;

    Ok(PreambleOutcome::Emitted)
}

/// Strict mode: the preamble must be one of the preamble-tagged templates,
/// verbatim. Candidates are rendered, shuffled, and the model picks one.
async fn strict_preamble(
    generator: &dyn SchematicGenerator,
    canned_store: &dyn CannedResponseStore,
    context: &LoadedContext,
) -> Option<String> {
    let candidates = canned_store
        .find_for_context(&context.agent, &[], &[])
        .await
        .ok()?;

    let mut rendered: Vec<String> = candidates
        .iter()
        .filter(|c| c.has_tag(PREAMBLE_TAG))
        .filter_map(|c| render_template(&c.template, &HashMap::new()).ok())
        .collect();
    if rendered.is_empty() {
        return None;
    }

    {
        let mut rng = rand::thread_rng();
        rendered.shuffle(&mut rng);
    }

    let listing: Vec<String> = rendered
        .iter()
        .enumerate()
        .map(|(index, text)| format!("{}. {}", index + 1, text))
        .collect();
    let prompt = format!(
        "Conversation so far:\n{}\n\nThe agent wants to send a brief holding \
         message while it works. Pick the most fitting one:\n{}",
        context.interaction.transcript(),
        listing.join("\n"),
    );

    match generate::<PreambleChoice>(generator, &prompt, &GenerationHints::default()).await {
        Ok(selection) if (1..=rendered.len()).contains(&selection.content.choice) => {
            Some(rendered[selection.content.choice - 1].clone())
        }
        Ok(_) | Err(_) => {
            // The list is shuffled, so the first entry is a random pick.
            Some(rendered[0].clone())
        }
    }
}

/// Non-strict modes: the model writes a short phrase in the exemplars' vein
async fn fluid_preamble(
    generator: &dyn SchematicGenerator,
    context: &LoadedContext,
) -> Option<String> {
    let exemplars: Vec<String> = EXEMPLARS.iter().map(|e| format!("- {e}")).collect();
    let prompt = format!(
        "Conversation so far:\n{}\n\nWrite one very short holding message the \
         agent can send while it works on the customer's request, in the vein \
         of:\n{}\n\nDo not answer the request itself.",
        context.interaction.transcript(),
        exemplars.join("\n"),
    );

    match generate::<MessageDraft>(generator, &prompt, &GenerationHints::default()).await {
        Ok(draft) if !draft.content.message.trim().is_empty() => Some(draft.content.message),
        Ok(_) => None,
        Err(err) => {
            warn!(error = %err, "Preamble generation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, Customer};
    use crate::canned::CannedResponse;
    use crate::engine::emitter::EventPublisher;
    use crate::engine::hooks::{HookOutcome, NoopHooks};
    use crate::error::EngineError;
    use crate::event::{Event, EventKind, EventSource, Participant};
    use crate::provider::TokenUsage;
    use crate::session::Session;
    use crate::storage::memory::{InMemoryCannedResponseStore, InMemorySessionStore};
    use crate::storage::{EventFilter, SessionStore};
    use crate::types::{AgentId, CustomerId, EventId};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex;

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

    fn interaction_with_waits(waits: &[f64]) -> Interaction {
        let mut events = Vec::new();
        let mut at = Utc::now();
        let participant = Participant {
            id: "p".to_string(),
            display_name: "P".to_string(),
        };
        for (index, wait) in waits.iter().enumerate() {
            events.push(Event {
                id: EventId::new(),
                offset: (index * 2) as u64,
                kind: EventKind::Message,
                source: EventSource::Customer,
                correlation_id: "R".to_string(),
                created_at: at,
                data: MessageEventData::new("question", participant.clone()).to_value(),
            });
            at += ChronoDuration::milliseconds((wait * 1000.0) as i64);
            events.push(Event {
                id: EventId::new(),
                offset: (index * 2 + 1) as u64,
                kind: EventKind::Message,
                source: EventSource::AiAgent,
                correlation_id: "R".to_string(),
                created_at: at,
                data: MessageEventData::new("answer", participant.clone()).to_value(),
            });
            at += ChronoDuration::seconds(30);
        }
        Interaction::new(events)
    }

    #[test]
    fn test_preamble_required_fresh_session() {
        assert!(preamble_required(&Interaction::default()));
    }

    #[test]
    fn test_preamble_not_required_after_three_fast_waits() {
        let interaction = interaction_with_waits(&[1.0, 1.0, 1.0]);
        assert!(!preamble_required(&interaction));
    }

    #[test]
    fn test_preamble_required_after_slow_waits() {
        let interaction = interaction_with_waits(&[1.0, 6.0, 7.0]);
        assert!(preamble_required(&interaction));
    }

    #[test]
    fn test_preamble_not_required_after_preamble() {
        let participant = Participant {
            id: "p".to_string(),
            display_name: "P".to_string(),
        };
        let mut data = MessageEventData::new("One sec...", participant);
        data.tags.push(PREAMBLE_TAG.to_string());
        let interaction = Interaction::new(vec![Event {
            id: EventId::new(),
            offset: 0,
            kind: EventKind::Message,
            source: EventSource::AiAgent,
            correlation_id: "R".to_string(),
            created_at: Utc::now(),
            data: data.to_value(),
        }]);
        assert!(!preamble_required(&interaction));
    }

    async fn harness(
        mode: CompositionMode,
    ) -> (
        LoadedContext,
        Arc<InMemorySessionStore>,
        Arc<EventPublisher>,
        crate::types::SessionId,
    ) {
        let store = Arc::new(InMemorySessionStore::new());
        let session = Session::new(AgentId::new(), CustomerId::new());
        let session_id = store.create_session(session.clone()).await.unwrap();
        let context = LoadedContext::new(
            session,
            Agent::new("Support").with_composition_mode(mode),
            Customer::guest(),
            Interaction::default(),
        );
        let publisher = Arc::new(EventPublisher::new(
            store.clone(),
            session_id,
            EventSource::AiAgent,
        ));
        (context, store, publisher, session_id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fluid_preamble_emits_message_then_processing() {
        let (context, store, publisher, session_id) = harness(CompositionMode::Fluid).await;
        let generator = Arc::new(ScriptedGenerator {
            responses: Mutex::new(vec![serde_json::json!({"message": "One moment..."})]),
        });
        let canned_store = Arc::new(InMemoryCannedResponseStore::new());

        let outcome = run_preamble(
            generator,
            canned_store,
            context,
            Arc::new(NoopHooks),
            publisher,
            CorrelationScope::root_with_id("p").push("process"),
        )
        .await
        .unwrap();

        assert_eq!(outcome, PreambleOutcome::Emitted);

        let events = store
            .list_events(&session_id, &EventFilter::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);

        let message = events[0].as_message().unwrap();
        assert!(message.is_preamble());
        assert_eq!(message.message, "One moment...");

        let status = events[1].as_status().unwrap();
        assert_eq!(status.data.stage.as_deref(), Some(INTERPRETING_STAGE));
        assert!(events[1].correlation_id.contains("::preamble"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_preamble_is_verbatim_template() {
        let (context, store, publisher, session_id) =
            harness(CompositionMode::CannedStrict).await;
        let canned_store = Arc::new(InMemoryCannedResponseStore::new());
        canned_store
            .add(
                CannedResponse::new("Bear with me a moment.")
                    .with_tags(vec![PREAMBLE_TAG.to_string()]),
            )
            .await;

        let generator = Arc::new(ScriptedGenerator {
            responses: Mutex::new(vec![serde_json::json!({"choice": 1})]),
        });

        let outcome = run_preamble(
            generator,
            canned_store,
            context,
            Arc::new(NoopHooks),
            publisher,
            CorrelationScope::root_with_id("p"),
        )
        .await
        .unwrap();

        assert_eq!(outcome, PreambleOutcome::Emitted);
        let events = store
            .list_events(&session_id, &EventFilter::default())
            .await
            .unwrap();
        assert_eq!(
            events[0].as_message().unwrap().message,
            "Bear with me a moment."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_preamble_without_templates_skips() {
        let (context, store, publisher, session_id) =
            harness(CompositionMode::CannedStrict).await;
        let generator = Arc::new(ScriptedGenerator {
            responses: Mutex::new(vec![]),
        });

        let outcome = run_preamble(
            generator,
            Arc::new(InMemoryCannedResponseStore::new()),
            context,
            Arc::new(NoopHooks),
            publisher,
            CorrelationScope::root_with_id("p"),
        )
        .await
        .unwrap();

        assert_eq!(outcome, PreambleOutcome::Skipped);
        assert!(store
            .list_events(&session_id, &EventFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_bail_suppresses_preamble() {
        struct BailOnMessage;
        #[async_trait]
        impl EngineHooks for BailOnMessage {
            async fn on_message_generated(
                &self,
                _context: &LoadedContext,
                _chunk: &str,
            ) -> HookOutcome {
                HookOutcome::Bail
            }
        }

        let (context, store, publisher, session_id) = harness(CompositionMode::Fluid).await;
        let generator = Arc::new(ScriptedGenerator {
            responses: Mutex::new(vec![serde_json::json!({"message": "One moment..."})]),
        });

        let outcome = run_preamble(
            generator,
            Arc::new(InMemoryCannedResponseStore::new()),
            context,
            Arc::new(BailOnMessage),
            publisher,
            CorrelationScope::root_with_id("p"),
        )
        .await
        .unwrap();

        assert_eq!(outcome, PreambleOutcome::Bailed);
        assert!(store
            .list_events(&session_id, &EventFilter::default())
            .await
            .unwrap()
            .is_empty());
    }
}
