//! Engine lifecycle hooks
//!
//! Embedders observe and steer a processing cycle through [`EngineHooks`].
//! Every hook returns an explicit [`HookOutcome`]; a `Bail` is not an error,
//! it is a controlled early exit whose effect (return, break, or drop one
//! chunk) depends on the stage, as documented per method.

use crate::context::LoadedContext;
use crate::event::Event;
use async_trait::async_trait;

/// Result of a hook invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Proceed with the cycle
    Continue,
    /// Stop early at this stage
    Bail,
}

impl HookOutcome {
    /// Whether the hook requested an early exit
    pub fn is_bail(&self) -> bool {
        matches!(self, HookOutcome::Bail)
    }
}

/// Observation and control points across a processing cycle.
///
/// All methods default to `Continue`; implement only what you need.
#[async_trait]
pub trait EngineHooks: Send + Sync {
    /// Before `acknowledged` is emitted; bail returns without emitting
    async fn on_acknowledging(&self, _context: &LoadedContext) -> HookOutcome {
        HookOutcome::Continue
    }

    /// After `acknowledged` was emitted; bail returns
    async fn on_acknowledged(&self, _context: &LoadedContext) -> HookOutcome {
        HookOutcome::Continue
    }

    /// Before preparation starts; bail returns
    async fn on_preparing(&self, _context: &LoadedContext) -> HookOutcome {
        HookOutcome::Continue
    }

    /// Before each preparation iteration; bail breaks out of the loop
    async fn on_preparation_iteration_start(&self, _context: &LoadedContext) -> HookOutcome {
        HookOutcome::Continue
    }

    /// After each preparation iteration; bail breaks out of the loop
    async fn on_preparation_iteration_end(&self, _context: &LoadedContext) -> HookOutcome {
        HookOutcome::Continue
    }

    /// Before message generation; bail returns without generating
    async fn on_generating_messages(&self, _context: &LoadedContext) -> HookOutcome {
        HookOutcome::Continue
    }

    /// Per generated chunk, before it is emitted; bail drops this chunk but
    /// the remaining chunks still go out
    async fn on_message_generated(&self, _context: &LoadedContext, _chunk: &str) -> HookOutcome {
        HookOutcome::Continue
    }

    /// After post-processing, with every event the cycle emitted
    async fn on_messages_emitted(&self, _context: &LoadedContext, _events: &[Event]) {}
}

/// Hooks that never interfere
pub struct NoopHooks;

#[async_trait]
impl EngineHooks for NoopHooks {}
