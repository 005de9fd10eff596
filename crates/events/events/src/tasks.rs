//! Best-effort background task submission.
//!
//! Side effects that must not block or fail the caller (webhook fan-out after
//! a domain action, cache refreshes) are submitted here instead of being
//! spawned bare. Every failure is reported on an explicit channel.

use std::fmt::Display;
use std::future::Future;

use tokio::sync::mpsc;

/// A background task that returned an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Name given at submission.
    pub task: String,
    /// Error rendered as text.
    pub error: String,
}

/// Receiving end of the failure channel.
pub type TaskFailures = mpsc::UnboundedReceiver<TaskFailure>;

/// Spawns fallible futures on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    failures: mpsc::UnboundedSender<TaskFailure>,
}

impl TaskRunner {
    /// Creates a runner and the receiver its failures are sent to.
    pub fn new() -> (Self, TaskFailures) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { failures: tx }, rx)
    }

    /// Creates a runner whose failures are logged at error level.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_log_sink() -> Self {
        let (runner, mut failures) = Self::new();
        tokio::spawn(async move {
            while let Some(failure) = failures.recv().await {
                tracing::error!(
                    task = %failure.task,
                    error = %failure.error,
                    "Background task failed"
                );
            }
        });
        runner
    }

    /// Submits a task. Returns immediately; the task runs detached.
    pub fn submit<F, E>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let failures = self.failures.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                let failure = TaskFailure {
                    task: name,
                    error: e.to_string(),
                };
                if let Err(mpsc::error::SendError(lost)) = failures.send(failure) {
                    tracing::error!(
                        task = %lost.task,
                        error = %lost.error,
                        "Background task failed with no failure sink attached"
                    );
                }
            }
        });
    }
}
