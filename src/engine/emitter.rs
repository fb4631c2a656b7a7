//! Event emission
//!
//! Two implementations of the emitter contract: [`EventPublisher`] writes
//! through to the session store and returns the persisted event, while
//! [`EventBuffer`] accumulates in memory until its owner flushes it (used by
//! nested sub-engines that must not publish half-finished work). Emissions
//! from one correlation scope are delivered in program order; ordering
//! across scopes exists only through the store's monotonic offsets.

use crate::correlation::CorrelationScope;
use crate::error::Result;
use crate::event::{
    Event, EventKind, EventSource, MessageEventData, StatusEventData, ToolEventData,
};
use crate::storage::SessionStore;
use crate::types::{EventId, SessionId};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Emits events attributed to a correlation scope
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Emit a status event
    async fn emit_status(
        &self,
        scope: &CorrelationScope,
        data: StatusEventData,
    ) -> Result<Event>;

    /// Emit a message event
    async fn emit_message(
        &self,
        scope: &CorrelationScope,
        data: MessageEventData,
    ) -> Result<Event>;

    /// Emit a tool event
    async fn emit_tool(&self, scope: &CorrelationScope, data: ToolEventData) -> Result<Event>;

    /// Emit a custom event
    async fn emit_custom(
        &self,
        scope: &CorrelationScope,
        data: serde_json::Value,
    ) -> Result<Event>;
}

/// Write-through emitter backed by the session store
pub struct EventPublisher {
    store: Arc<dyn SessionStore>,
    session_id: SessionId,
    source: EventSource,
}

impl EventPublisher {
    /// Create a publisher for one session
    pub fn new(store: Arc<dyn SessionStore>, session_id: SessionId, source: EventSource) -> Self {
        Self {
            store,
            session_id,
            source,
        }
    }

    async fn publish(
        &self,
        kind: EventKind,
        scope: &CorrelationScope,
        data: serde_json::Value,
    ) -> Result<Event> {
        let event = self
            .store
            .create_event(&self.session_id, kind, self.source, scope.as_str(), data)
            .await?;
        debug!(
            session_id = %self.session_id,
            offset = event.offset,
            kind = ?kind,
            correlation_id = %scope,
            "Event published"
        );
        Ok(event)
    }
}

#[async_trait]
impl EventEmitter for EventPublisher {
    async fn emit_status(
        &self,
        scope: &CorrelationScope,
        data: StatusEventData,
    ) -> Result<Event> {
        self.publish(EventKind::Status, scope, data.to_value()).await
    }

    async fn emit_message(
        &self,
        scope: &CorrelationScope,
        data: MessageEventData,
    ) -> Result<Event> {
        self.publish(EventKind::Message, scope, data.to_value()).await
    }

    async fn emit_tool(&self, scope: &CorrelationScope, data: ToolEventData) -> Result<Event> {
        self.publish(EventKind::Tool, scope, data.to_value()).await
    }

    async fn emit_custom(
        &self,
        scope: &CorrelationScope,
        data: serde_json::Value,
    ) -> Result<Event> {
        self.publish(EventKind::Custom, scope, data).await
    }
}

/// Accumulating emitter; offsets are provisional buffer positions until the
/// owner flushes into a write-through emitter
pub struct EventBuffer {
    source: EventSource,
    events: Mutex<Vec<Event>>,
}

impl EventBuffer {
    /// Create an empty buffer
    pub fn new(source: EventSource) -> Self {
        Self {
            source,
            events: Mutex::new(Vec::new()),
        }
    }

    async fn buffer(
        &self,
        kind: EventKind,
        scope: &CorrelationScope,
        data: serde_json::Value,
    ) -> Result<Event> {
        let mut events = self.events.lock().await;
        let event = Event {
            id: EventId::new(),
            offset: events.len() as u64,
            kind,
            source: self.source,
            correlation_id: scope.as_str().to_string(),
            created_at: Utc::now(),
            data,
        };
        events.push(event.clone());
        Ok(event)
    }

    /// Take the buffered events without publishing them
    pub async fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().await)
    }

    /// Re-emit everything buffered so far through `target`, in order
    pub async fn flush(&self, target: &dyn EventEmitter) -> Result<Vec<Event>> {
        let buffered = self.drain().await;
        let mut published = Vec::with_capacity(buffered.len());
        for event in buffered {
            let scope = CorrelationScope::from(event.correlation_id.as_str());
            let persisted = match event.kind {
                EventKind::Status => {
                    let data = serde_json::from_value(event.data)?;
                    target.emit_status(&scope, data).await?
                }
                EventKind::Message => {
                    let data = serde_json::from_value(event.data)?;
                    target.emit_message(&scope, data).await?
                }
                EventKind::Tool => {
                    let data = serde_json::from_value(event.data)?;
                    target.emit_tool(&scope, data).await?
                }
                EventKind::Custom => target.emit_custom(&scope, event.data).await?,
            };
            published.push(persisted);
        }
        Ok(published)
    }
}

#[async_trait]
impl EventEmitter for EventBuffer {
    async fn emit_status(
        &self,
        scope: &CorrelationScope,
        data: StatusEventData,
    ) -> Result<Event> {
        self.buffer(EventKind::Status, scope, data.to_value()).await
    }

    async fn emit_message(
        &self,
        scope: &CorrelationScope,
        data: MessageEventData,
    ) -> Result<Event> {
        self.buffer(EventKind::Message, scope, data.to_value()).await
    }

    async fn emit_tool(&self, scope: &CorrelationScope, data: ToolEventData) -> Result<Event> {
        self.buffer(EventKind::Tool, scope, data.to_value()).await
    }

    async fn emit_custom(
        &self,
        scope: &CorrelationScope,
        data: serde_json::Value,
    ) -> Result<Event> {
        self.buffer(EventKind::Custom, scope, data).await
    }
}
