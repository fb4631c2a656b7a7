//! Tool integration for external API and function calls
//!
//! Tools are addressed by a `(service, tool)` composite id. The engine never
//! decides lexically which tool to call; candidate tools come from explicit
//! guideline/journey associations and the final call decision comes from the
//! tool caller's per-tool inference. This module holds the definitions, the
//! registry, and the *tool insights* the engine accumulates about parameters
//! it needed but could not obtain this turn.

use crate::error::ToolError;
use crate::event::ToolCallResultData;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Composite tool identifier: `(service, tool)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToolId {
    pub service: String,
    pub tool: String,
}

impl ToolId {
    /// Create a tool id
    pub fn new(service: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            tool: tool.into(),
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.tool)
    }
}

// Serialized as "service:tool" so event payloads stay flat and readable.
impl Serialize for ToolId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ToolId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ToolIdVisitor;

        impl Visitor<'_> for ToolIdVisitor {
            type Value = ToolId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string of the form \"service:tool\"")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ToolId, E> {
                match value.split_once(':') {
                    Some((service, tool)) if !service.is_empty() && !tool.is_empty() => {
                        Ok(ToolId::new(service, tool))
                    }
                    _ => Err(E::custom(format!("invalid tool id: {value}"))),
                }
            }
        }

        deserializer.deserialize_str(ToolIdVisitor)
    }
}

/// Schema of one tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub description: String,
    /// JSON type name: string, number, boolean, object, array
    pub param_type: String,
    pub required: bool,
}

impl ToolParameter {
    /// Required parameter
    pub fn required(description: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            param_type: param_type.into(),
            required: true,
        }
    }

    /// Optional parameter
    pub fn optional(description: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            param_type: param_type.into(),
            required: false,
        }
    }
}

/// Definition of a tool as shown to the inference prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: ToolId,
    pub description: String,
    pub parameters: HashMap<String, ToolParameter>,
}

impl ToolDescriptor {
    /// Names of the required parameters
    pub fn required_parameters(&self) -> HashSet<&str> {
        self.parameters
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// What a tool produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Opaque output forwarded to the composer prompt
    pub data: serde_json::Value,
    /// Template-substitution values for canned responses
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub canned_response_fields: HashMap<String, serde_json::Value>,
    /// Fallback textual responses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub canned_responses: Vec<String>,
}

impl ToolOutcome {
    /// Outcome carrying only opaque data
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data,
            canned_response_fields: HashMap::new(),
            canned_responses: Vec::new(),
        }
    }
}

impl From<ToolOutcome> for ToolCallResultData {
    fn from(outcome: ToolOutcome) -> Self {
        ToolCallResultData {
            data: outcome.data,
            canned_response_fields: outcome.canned_response_fields,
            canned_responses: outcome.canned_responses,
        }
    }
}

/// Trait for tools that can be executed by the engine
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Definition shown to the inference prompt
    fn descriptor(&self) -> &ToolDescriptor;

    /// Execute the tool with the inferred arguments
    async fn execute(
        &self,
        arguments: HashMap<String, serde_json::Value>,
    ) -> std::result::Result<ToolOutcome, ToolError>;
}

/// Registry of executable tools keyed by `(service, tool)`
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<ToolId, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a tool under its descriptor id
    pub async fn register(&self, tool: Arc<dyn Tool>) -> std::result::Result<ToolId, ToolError> {
        let tool_id = tool.descriptor().id.clone();

        let mut tools = self.tools.write().await;
        if tools.contains_key(&tool_id) {
            warn!(tool_id = %tool_id, "Attempted to register duplicate tool");
            return Err(ToolError::AlreadyRegistered(tool_id));
        }

        info!(tool_id = %tool_id, total_tools = tools.len() + 1, "Registering tool");
        tools.insert(tool_id.clone(), tool);
        Ok(tool_id)
    }

    /// Get a tool by id
    pub async fn get(&self, tool_id: &ToolId) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(tool_id).cloned()
    }

    /// List the descriptors of all registered tools
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        let tools = self.tools.read().await;
        tools.values().map(|t| t.descriptor().clone()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A parameter the engine needed but could not obtain this turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInsight {
    pub tool_id: ToolId,
    pub parameter: String,
    /// Ordinal of the guideline that wanted the call; lower wins when the
    /// composer has to choose what to ask about first
    pub precedence: usize,
}

/// Record of missing and invalid parameters across a preparation iteration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInsights {
    pub missing_data: Vec<ParameterInsight>,
    pub invalid_data: Vec<ParameterInsight>,
}

impl ToolInsights {
    /// Whether anything was recorded
    pub fn is_empty(&self) -> bool {
        self.missing_data.is_empty() && self.invalid_data.is_empty()
    }

    /// Merge another iteration's insights into this one
    pub fn merge(&mut self, other: ToolInsights) {
        self.missing_data.extend(other.missing_data);
        self.invalid_data.extend(other.invalid_data);
    }

    /// Resolve precedence: a parameter reported both missing and invalid for
    /// the same tool keeps only the `missing` entry, and duplicates within a
    /// list collapse by `(tool_id, parameter)`.
    pub fn filtered(&self) -> ToolInsights {
        let mut seen: HashSet<(ToolId, String)> = HashSet::new();
        let mut missing = Vec::new();
        for insight in &self.missing_data {
            if seen.insert((insight.tool_id.clone(), insight.parameter.clone())) {
                missing.push(insight.clone());
            }
        }

        let mut invalid = Vec::new();
        for insight in &self.invalid_data {
            if seen.insert((insight.tool_id.clone(), insight.parameter.clone())) {
                invalid.push(insight.clone());
            }
        }

        debug!(
            missing = missing.len(),
            invalid = invalid.len(),
            "Filtered tool insights"
        );

        ToolInsights {
            missing_data: missing,
            invalid_data: invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool {
        descriptor: ToolDescriptor,
    }

    impl EchoTool {
        fn new() -> Self {
            let mut parameters = HashMap::new();
            parameters.insert(
                "message".to_string(),
                ToolParameter::required("Message to echo", "string"),
            );
            Self {
                descriptor: ToolDescriptor {
                    id: ToolId::new("testing", "echo"),
                    description: "Echo the message back".to_string(),
                    parameters,
                },
            }
        }
    }

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(
            &self,
            arguments: HashMap<String, serde_json::Value>,
        ) -> std::result::Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::data(serde_json::to_value(arguments).unwrap()))
        }
    }

    #[test]
    fn test_tool_id_display_and_serde() {
        let id = ToolId::new("inventory", "check_products_availability");
        assert_eq!(id.to_string(), "inventory:check_products_availability");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"inventory:check_products_availability\"");

        let back: ToolId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_tool_id_deserialize_rejects_malformed() {
        let result: Result<ToolId, _> = serde_json::from_str("\"no-separator\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_required_parameters() {
        let mut parameters = HashMap::new();
        parameters.insert(
            "origin".to_string(),
            ToolParameter::required("Origin airport", "string"),
        );
        parameters.insert(
            "seat_preference".to_string(),
            ToolParameter::optional("Preferred seat", "string"),
        );
        let descriptor = ToolDescriptor {
            id: ToolId::new("flights", "book"),
            description: "Book a flight".to_string(),
            parameters,
        };

        let required = descriptor.required_parameters();
        assert_eq!(required.len(), 1);
        assert!(required.contains("origin"));
    }

    #[tokio::test]
    async fn test_registry_register_and_get() {
        let registry = ToolRegistry::new();
        let tool_id = registry.register(Arc::new(EchoTool::new())).await.unwrap();

        assert!(registry.get(&tool_id).await.is_some());
        assert!(registry
            .get(&ToolId::new("testing", "missing"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_registry_rejects_duplicates() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new())).await.unwrap();

        let result = registry.register(Arc::new(EchoTool::new())).await;
        assert!(matches!(result, Err(ToolError::AlreadyRegistered(_))));
    }

    #[test]
    fn test_insights_precedence_missing_wins() {
        let tool_id = ToolId::new("flights", "book");
        let insights = ToolInsights {
            missing_data: vec![ParameterInsight {
                tool_id: tool_id.clone(),
                parameter: "origin".to_string(),
                precedence: 0,
            }],
            invalid_data: vec![
                ParameterInsight {
                    tool_id: tool_id.clone(),
                    parameter: "origin".to_string(),
                    precedence: 0,
                },
                ParameterInsight {
                    tool_id: tool_id.clone(),
                    parameter: "return_date".to_string(),
                    precedence: 0,
                },
            ],
        };

        let filtered = insights.filtered();
        assert_eq!(filtered.missing_data.len(), 1);
        assert_eq!(filtered.invalid_data.len(), 1);
        assert_eq!(filtered.invalid_data[0].parameter, "return_date");
    }

    #[test]
    fn test_insights_deduplicate() {
        let tool_id = ToolId::new("flights", "book");
        let duplicate = ParameterInsight {
            tool_id,
            parameter: "origin".to_string(),
            precedence: 1,
        };
        let insights = ToolInsights {
            missing_data: vec![duplicate.clone(), duplicate],
            invalid_data: vec![],
        };

        assert_eq!(insights.filtered().missing_data.len(), 1);
    }
}
