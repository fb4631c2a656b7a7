//! Error types for the Converse library
//!
//! This module provides comprehensive error types using thiserror for all
//! engine operations. Cancellation is an explicit variant rather than a
//! panic or an out-of-band signal: every suspension point in the engine
//! returns `EngineError::Cancelled` when its cancellation token has fired.

use crate::tool::ToolId;
use crate::types::{AgentId, CustomerId, GuidelineId, JourneyId, SessionId};
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// The processing task was cancelled (superseded by a newer cycle)
    #[error("Processing cancelled for session {0}")]
    Cancelled(SessionId),

    /// LLM adapter error
    #[error("LLM generation error: {0}")]
    Llm(String),

    /// The LLM returned output that does not satisfy the requested schema
    #[error("Schema parse failure: {0}")]
    SchemaParse(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Tool execution error
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Template rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// The external timeout elapsed before the cycle completed
    #[error("Processing timed out for session {0}")]
    Timeout(SessionId),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error represents cooperative cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }
}

/// Storage-related errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Agent not found
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Customer not found
    #[error("Customer not found: {0}")]
    CustomerNotFound(CustomerId),

    /// Guideline not found
    #[error("Guideline not found: {0}")]
    GuidelineNotFound(GuidelineId),

    /// Journey not found
    #[error("Journey not found: {0}")]
    JourneyNotFound(JourneyId),

    /// Resource already exists
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Serialization failed
    #[error("Storage serialization failed: {0}")]
    Serialization(String),

    /// Internal storage error
    #[error("Internal storage error: {0}")]
    Internal(String),
}

/// Tool-related errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ToolError {
    /// Tool not registered under the given id
    #[error("Tool not found: {0}")]
    NotFound(ToolId),

    /// Tool already registered under the given id
    #[error("Tool already registered: {0}")]
    AlreadyRegistered(ToolId),

    /// Tool execution failed
    #[error("Tool execution failed for {tool_id}: {message}")]
    ExecutionFailed { tool_id: ToolId, message: String },

    /// Invalid tool arguments
    #[error("Invalid tool arguments for {tool_id}: {message}")]
    InvalidArguments { tool_id: ToolId, message: String },

    /// Internal tool error
    #[error("Internal tool error: {0}")]
    Internal(String),
}

/// Type alias for engine Result
pub type Result<T> = std::result::Result<T, EngineError>;

/// Type alias for Storage Result
pub type StorageResult<T> = std::result::Result<T, StorageError>;
