//! Session-log events
//!
//! A session is an append-only sequence of events with gap-free, monotonic
//! offsets assigned by the session store. Event payloads are opaque JSON at
//! the store boundary; this module also defines the typed payload shapes the
//! engine emits (status, message, tool) and helpers to parse them back.

use crate::tool::ToolId;
use crate::types::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of a session event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A conversational message (customer or agent)
    Message,
    /// A tool invocation record
    Tool,
    /// An engine status transition
    Status,
    /// Application-defined payload
    Custom,
}

/// Originator of a session event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Customer,
    AiAgent,
    HumanAgent,
    System,
}

/// An element of the session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for the event
    pub id: EventId,
    /// Position in the session log; monotonic and gap-free per session
    pub offset: u64,
    /// Kind of event
    pub kind: EventKind,
    /// Originator
    pub source: EventSource,
    /// Correlation scope active when the event was emitted
    pub correlation_id: String,
    /// When the event was created
    pub created_at: DateTime<Utc>,
    /// Opaque JSON payload
    pub data: serde_json::Value,
}

impl Event {
    /// Parse the payload as a status event
    pub fn as_status(&self) -> Option<StatusEventData> {
        if self.kind != EventKind::Status {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Parse the payload as a message event
    pub fn as_message(&self) -> Option<MessageEventData> {
        if self.kind != EventKind::Message {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Parse the payload as a tool event
    pub fn as_tool(&self) -> Option<ToolEventData> {
        if self.kind != EventKind::Tool {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// Engine status values surfaced to front-ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Acknowledged,
    Processing,
    Typing,
    Ready,
    Cancelled,
    Error,
}

/// Detail block carried by status events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDetails {
    /// Human-readable stage label (only on `processing`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Opaque exception summary (only on `error`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

/// Payload of a status event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEventData {
    pub status: Status,
    #[serde(default)]
    pub data: StatusDetails,
}

impl StatusEventData {
    /// `acknowledged` with empty detail
    pub fn acknowledged() -> Self {
        Self {
            status: Status::Acknowledged,
            data: StatusDetails::default(),
        }
    }

    /// `processing` with a stage label
    pub fn processing(stage: impl Into<String>) -> Self {
        Self {
            status: Status::Processing,
            data: StatusDetails {
                stage: Some(stage.into()),
                exception: None,
            },
        }
    }

    /// `typing` with empty detail
    pub fn typing() -> Self {
        Self {
            status: Status::Typing,
            data: StatusDetails::default(),
        }
    }

    /// `ready` with empty detail
    pub fn ready() -> Self {
        Self {
            status: Status::Ready,
            data: StatusDetails::default(),
        }
    }

    /// `cancelled` with empty detail
    pub fn cancelled() -> Self {
        Self {
            status: Status::Cancelled,
            data: StatusDetails::default(),
        }
    }

    /// `error` with an opaque exception summary
    pub fn error(exception: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: StatusDetails {
                stage: None,
                exception: Some(exception.into()),
            },
        }
    }

    /// Serialize into the opaque payload stored on the event
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// The replying party recorded on message events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
}

/// Payload of a message event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEventData {
    pub message: String,
    pub participant: Participant,
    /// The pre-selection draft, kept for inspection (canned modes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    /// Fallback canned responses offered by tools this cycle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub canned_responses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Tag carried by preamble messages
pub const PREAMBLE_TAG: &str = "preamble";

impl MessageEventData {
    /// Plain agent message with no draft or tags
    pub fn new(message: impl Into<String>, participant: Participant) -> Self {
        Self {
            message: message.into(),
            participant,
            draft: None,
            canned_responses: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Whether the message is a latency-masking preamble
    pub fn is_preamble(&self) -> bool {
        self.tags.iter().any(|t| t == PREAMBLE_TAG)
    }

    /// Serialize into the opaque payload stored on the event
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Result block of a recorded tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResultData {
    /// Opaque tool output
    pub data: serde_json::Value,
    /// Template-substitution values surfaced to the canned composer
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub canned_response_fields: HashMap<String, serde_json::Value>,
    /// Fallback textual responses offered by the tool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub canned_responses: Vec<String>,
}

/// One recorded tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_id: ToolId,
    pub arguments: HashMap<String, serde_json::Value>,
    pub result: ToolCallResultData,
}

/// Payload of a tool event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEventData {
    pub tool_calls: Vec<ToolCallRecord>,
}

impl ToolEventData {
    /// Serialize into the opaque payload stored on the event
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
