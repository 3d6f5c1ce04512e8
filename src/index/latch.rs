//! Completion latch for a scheduler run
//!
//! Fires once when the last pending job finishes and no introspection is
//! outstanding. Exactly one waiter is allowed at a time.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

/// Errors that can occur during latch operations
#[derive(Debug, thiserror::Error)]
pub enum LatchError {
    #[error("Multiple waiters not allowed - only one waiter can wait at a time")]
    MultipleWaiters,

    #[error("Timeout waiting for completion")]
    Timeout,

    #[error("Latch was cancelled")]
    Cancelled,

    #[error("Run failed: {0}")]
    Failed(String),
}

#[derive(Debug, Default)]
struct LatchState {
    completed: bool,
    error: Option<String>,
    has_waiter: bool,
}

#[derive(Clone)]
pub struct CompletionLatch {
    state: Arc<Mutex<LatchState>>,
    notify: Arc<Notify>,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LatchState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Wait for the latch, optionally bounded by `timeout`
    ///
    /// Returns immediately if the latch already fired.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<(), LatchError> {
        let mut state = self.state.lock().await;

        if state.completed {
            return Ok(());
        }
        if let Some(error) = &state.error {
            return Err(LatchError::Failed(error.clone()));
        }
        if state.has_waiter {
            warn!("CompletionLatch: Multiple waiters not allowed");
            return Err(LatchError::MultipleWaiters);
        }

        state.has_waiter = true;
        // Register interest before releasing the lock so a trigger in between is not lost
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        drop(state);
        trace!("CompletionLatch: Waiter registered");

        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, notified).await.ok(),
            None => {
                notified.await;
                Some(())
            }
        };

        let mut state = self.state.lock().await;
        state.has_waiter = false;

        match result {
            Some(()) => {
                if state.completed {
                    Ok(())
                } else if let Some(error) = &state.error {
                    Err(LatchError::Failed(error.clone()))
                } else {
                    warn!("CompletionLatch: Notified but neither completed nor failed");
                    Err(LatchError::Cancelled)
                }
            }
            None => {
                debug!("CompletionLatch: Timeout after {:?}", timeout);
                Err(LatchError::Timeout)
            }
        }
    }

    pub async fn trigger_success(&self) {
        let mut state = self.state.lock().await;
        if !state.completed && state.error.is_none() {
            state.completed = true;
            debug!("CompletionLatch: Triggered success");
            self.notify.notify_waiters();
        } else {
            trace!("CompletionLatch: Already triggered, ignoring success trigger");
        }
    }

    pub async fn trigger_failure(&self, error: String) {
        let mut state = self.state.lock().await;
        if !state.completed && state.error.is_none() {
            debug!("CompletionLatch: Triggered failure: {}", error);
            state.error = Some(error);
            self.notify.notify_waiters();
        }
    }

    pub async fn is_triggered(&self) -> bool {
        let state = self.state.lock().await;
        state.completed || state.error.is_some()
    }

    pub async fn has_waiter(&self) -> bool {
        self.state.lock().await.has_waiter
    }
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompletionLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionLatch").finish()
    }
}
