//! Anthropic adapter
//!
//! Implements [`SchematicGenerator`] over Anthropic's messages API. The SDK
//! streams chunks through a callback; the adapter collects them and parses
//! the assembled text as JSON. Token usage is not reported by this SDK, so
//! usage accounting from this adapter is always zero.

use crate::error::{EngineError, Result};
use crate::provider::{
    extract_json, schema_instruction, GenerationHints, SchematicGenerator, TokenUsage,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: i32 = 4096;

/// Anthropic-backed schematic generator
pub struct AnthropicSchematicGenerator {
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: i32,
}

impl AnthropicSchematicGenerator {
    /// Create a generator with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Create a generator from the ANTHROPIC_API_KEY environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            EngineError::Configuration(
                "ANTHROPIC_API_KEY environment variable not set".to_string(),
            )
        })?;
        Ok(Self::new(api_key))
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the default temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set the maximum completion tokens
    pub fn with_max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl SchematicGenerator for AnthropicSchematicGenerator {
    async fn generate_value(
        &self,
        prompt: &str,
        schema: serde_json::Value,
        hints: &GenerationHints,
    ) -> Result<(serde_json::Value, TokenUsage)> {
        let temperature = hints.temperature.unwrap_or(self.temperature);
        info!(
            model = %self.model,
            temperature,
            prompt_length = prompt.len(),
            "Requesting Anthropic schematic completion"
        );

        let full_prompt = format!("{}\n\n{}", prompt, schema_instruction(&schema));
        let messages = json!([{ "role": "user", "content": full_prompt }]);

        // The SDK client is not Clone; build a fresh request per call.
        let request = anthropic_sdk::Client::new()
            .auth(&self.api_key)
            .model(&self.model)
            .messages(&messages)
            .max_tokens(self.max_tokens)
            .temperature(temperature)
            .build()
            .map_err(|e| EngineError::Llm(format!("Failed to build request: {e}")))?;

        let response_text = Arc::new(Mutex::new(String::new()));
        let response_text_clone = Arc::clone(&response_text);

        request
            .execute(move |chunk| {
                let response_text = Arc::clone(&response_text_clone);
                async move {
                    let mut text = response_text.lock().await;
                    text.push_str(&chunk);
                }
            })
            .await
            .map_err(|e| EngineError::Llm(format!("Anthropic API error: {e}")))?;

        let final_text = response_text.lock().await.clone();
        debug!(
            response_length = final_text.len(),
            "Anthropic schematic completion successful"
        );

        Ok((extract_json(&final_text)?, TokenUsage::default()))
    }

    fn name(&self) -> &str {
        "Anthropic"
    }
}
