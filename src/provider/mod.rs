//! LLM adapter abstraction and implementations
//!
//! Every LLM interaction in the engine is *schematic*: a prompt goes in and
//! typed JSON comes out. The [`SchematicGenerator`] trait works at the
//! `serde_json::Value` level so it stays object-safe; the [`generate`]
//! wrapper derives the JSON schema for the expected type with schemars,
//! embeds it in the prompt, and parses the adapter's output back into the
//! type. Transient failures are retried with a short exponential backoff.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicSchematicGenerator;
pub use openai::OpenAiSchematicGenerator;

/// Maximum attempts for one schematic generation
pub const MAX_ATTEMPTS: usize = 3;

/// Backoff before retrying attempt 2 and 3
pub const BACKOFF_DELAYS: [Duration; 2] = [Duration::from_millis(200), Duration::from_millis(600)];

/// Backoff before a hypothetical fourth attempt; kept for callers that keep
/// retrying at a coarser granularity (tool executions)
pub const FINAL_BACKOFF: Duration = Duration::from_millis(1400);

/// Per-call generation knobs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationHints {
    /// Sampling temperature; adapters fall back to their default when unset
    pub temperature: Option<f32>,
}

impl GenerationHints {
    /// Hints with a fixed temperature
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
        }
    }
}

/// Token accounting for one or more generations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Accumulate another generation's usage
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    /// Total tokens across both directions
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A typed generation result
#[derive(Debug, Clone)]
pub struct Schematic<T> {
    pub content: T,
    pub usage: TokenUsage,
}

/// Trait for LLM adapters producing schema-constrained JSON
#[async_trait]
pub trait SchematicGenerator: Send + Sync {
    /// Generate a JSON value answering `prompt` under `schema`
    async fn generate_value(
        &self,
        prompt: &str,
        schema: serde_json::Value,
        hints: &GenerationHints,
    ) -> Result<(serde_json::Value, TokenUsage)>;

    /// Adapter name for logging
    fn name(&self) -> &str;
}

/// Generate a typed result: derive the schema for `T`, call the adapter,
/// parse the output. A response that does not satisfy the schema surfaces as
/// [`EngineError::SchemaParse`]; retrying is the caller's decision.
pub async fn generate<T>(
    generator: &dyn SchematicGenerator,
    prompt: &str,
    hints: &GenerationHints,
) -> Result<Schematic<T>>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
    let schema_value = serde_json::to_value(schema)?;

    let (value, usage) = generator.generate_value(prompt, schema_value, hints).await?;
    let content: T = serde_json::from_value(value)
        .map_err(|e| EngineError::SchemaParse(format!("{} adapter: {}", generator.name(), e)))?;

    Ok(Schematic { content, usage })
}

/// Run `operation` up to [`MAX_ATTEMPTS`] times with backoff. The closure
/// receives the zero-based attempt index so callers can vary hints per
/// attempt. Cancellation is never retried.
pub async fn with_retries<T, F, Fut>(label: &str, operation: F) -> Result<T>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..MAX_ATTEMPTS {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(label, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) => {
                warn!(label, attempt, error = %err, "Attempt failed");
                last_error = Some(err);
                if attempt + 1 < MAX_ATTEMPTS {
                    tokio::time::sleep(BACKOFF_DELAYS[attempt.min(BACKOFF_DELAYS.len() - 1)])
                        .await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| EngineError::Internal(format!("{label}: no attempts ran"))))
}

/// Extract the first JSON object from raw model output.
///
/// Models occasionally wrap JSON in code fences or prose; adapters call this
/// before handing the value back to the typed layer.
pub fn extract_json(text: &str) -> Result<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }

    let start = text.find('{');
    let end = text.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(EngineError::SchemaParse(format!(
        "no JSON object found in model output ({} chars)",
        text.len()
    )))
}

/// Render a schema section appended to adapter prompts
pub(crate) fn schema_instruction(schema: &serde_json::Value) -> String {
    format!(
        "Respond with a single JSON object satisfying this JSON schema, with no \
         surrounding text:\n{}",
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
    )
}
