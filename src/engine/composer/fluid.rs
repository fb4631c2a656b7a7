//! Fluid generation
//!
//! Free-text reply generation: up to three attempts climbing a temperature
//! ladder, accepting the first response that parses into the draft schema
//! with a non-empty message.

use crate::context::LoadedContext;
use crate::error::{EngineError, Result};
use crate::provider::{generate, GenerationHints, Schematic, SchematicGenerator};
use tracing::{debug, warn};

use super::{draft_prompt, MessageDraft};

/// Temperatures tried across the three generation attempts
pub const TEMPERATURE_LADDER: [f32; 3] = [0.1, 0.3, 0.5];

/// Generate a reply draft for the prepared context.
///
/// Instead of sleeping between attempts the way transient retries do, each
/// attempt runs at the next temperature of the ladder; variance is the
/// recovery mechanism for degenerate outputs.
pub async fn generate_draft(
    generator: &dyn SchematicGenerator,
    context: &LoadedContext,
) -> Result<Schematic<MessageDraft>> {
    let prompt = draft_prompt(context);
    let mut last_error: Option<EngineError> = None;

    for (attempt, temperature) in TEMPERATURE_LADDER.iter().enumerate() {
        let hints = GenerationHints::with_temperature(*temperature);
        match generate::<MessageDraft>(generator, &prompt, &hints).await {
            Ok(draft) if !draft.content.message.trim().is_empty() => {
                if attempt > 0 {
                    debug!(attempt, temperature, "Draft accepted after retry");
                }
                return Ok(draft);
            }
            Ok(_) => {
                warn!(attempt, temperature, "Draft was empty; retrying");
                last_error = Some(EngineError::SchemaParse(
                    "draft message was empty".to_string(),
                ));
            }
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) => {
                warn!(attempt, temperature, error = %err, "Draft attempt failed");
                last_error = Some(err);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| EngineError::Internal("draft generation ran no attempts".to_string())))
}
