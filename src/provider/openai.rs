//! OpenAI adapter
//!
//! Implements [`SchematicGenerator`] over OpenAI chat completions in JSON
//! mode. The requested schema is appended to the prompt; the response body
//! is parsed and returned as a raw value for the typed layer to validate.

use crate::error::{EngineError, Result};
use crate::provider::{
    extract_json, schema_instruction, GenerationHints, SchematicGenerator, TokenUsage,
};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, info, warn};

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_TEMPERATURE: f32 = 0.3;

/// OpenAI-backed schematic generator
pub struct OpenAiSchematicGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiSchematicGenerator {
    /// Create a generator with the given API key
    pub fn new(api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }

    /// Create a generator from the OPENAI_API_KEY environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            EngineError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
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
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set the maximum completion tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl SchematicGenerator for OpenAiSchematicGenerator {
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
            "Requesting OpenAI schematic completion"
        );

        let full_prompt = format!("{}\n\n{}", prompt, schema_instruction(&schema));
        let messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(full_prompt),
                name: None,
            },
        )];

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder
            .model(&self.model)
            .messages(messages)
            .temperature(temperature)
            .response_format(ResponseFormat::JsonObject);

        if let Some(max_tokens) = self.max_tokens {
            request_builder.max_tokens(max_tokens);
        }

        let request = request_builder
            .build()
            .map_err(|e| EngineError::Llm(format!("Failed to build request: {e}")))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!(error = %e, "OpenAI API error");
            EngineError::Llm(format!("OpenAI API error: {e}"))
        })?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| EngineError::Llm("No content in OpenAI response".to_string()))?;

        debug!(
            response_length = content.len(),
            total_tokens = usage.total(),
            "OpenAI schematic completion successful"
        );

        Ok((extract_json(&content)?, usage))
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}
