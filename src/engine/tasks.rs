//! Background task management and cancellation plumbing
//!
//! One background processing task may run per session at a time. Dispatching
//! a new task for a session cancels the previous one (cooperatively, via its
//! token) and replaces it in the registry. Message generation runs inside a
//! [`CancellationSuppressionLatch`]: once the user has seen a typing
//! indicator, a follow-up message must not leave the session in a
//! "typing, then silence" state, so cancellation is deferred until the
//! protected region completes.

use crate::error::{EngineError, Result};
use crate::types::SessionId;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default deadline for one external processing request
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(57);

/// Return `Err(Cancelled)` if the token has fired
pub fn ensure_active(token: &CancellationToken, session_id: SessionId) -> Result<()> {
    if token.is_cancelled() {
        Err(EngineError::Cancelled(session_id))
    } else {
        Ok(())
    }
}

/// Defers cancellation across a protected region.
///
/// The shielded future runs to completion regardless of the token; the
/// caller learns afterwards whether cancellation fired in the meantime and
/// acts on it once the user-visible work is safely done.
pub struct CancellationSuppressionLatch {
    token: CancellationToken,
}

impl CancellationSuppressionLatch {
    /// Latch over the given token
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Run `fut` to completion; returns its output and whether cancellation
    /// was requested while the latch was held
    pub async fn shield<F>(&self, fut: F) -> (F::Output, bool)
    where
        F: Future,
    {
        let output = fut.await;
        (output, self.token.is_cancelled())
    }
}

struct TaskEntry {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry of per-session background tasks with cancel-and-replace
/// dispatch semantics
#[derive(Default)]
pub struct BackgroundTaskService {
    tasks: Mutex<HashMap<SessionId, TaskEntry>>,
}

impl BackgroundTaskService {
    /// Create an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a task for the session, cancelling and replacing any prior one.
    ///
    /// `make_task` receives the fresh token; the task must observe it at
    /// every suspension point. Returns the token so callers can cancel
    /// explicitly.
    pub async fn dispatch<F, Fut>(&self, session_id: SessionId, make_task: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task = make_task(token.clone());
        let handle = tokio::spawn(task);

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.insert(
            session_id,
            TaskEntry {
                token: token.clone(),
                handle,
            },
        ) {
            info!(session_id = %session_id, "Cancelling superseded processing task");
            previous.token.cancel();
        }

        debug!(session_id = %session_id, "Dispatched processing task");
        token
    }

    /// Cancel the session's task, if any; returns whether one was running
    pub async fn cancel(&self, session_id: &SessionId) -> bool {
        let mut tasks = self.tasks.lock().await;
        match tasks.remove(session_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Await completion of the session's current task (testing and shutdown)
    pub async fn wait(&self, session_id: &SessionId) {
        let entry = {
            let mut tasks = self.tasks.lock().await;
            tasks.remove(session_id)
        };
        if let Some(entry) = entry {
            let _ = entry.handle.await;
        }
    }

    /// Number of registered tasks (finished tasks included until replaced)
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Whether no tasks are registered
    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}
