//! Task settlement errors.

use thiserror::Error;

/// Terminal error a pool task can settle with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Application-level failure reported by the handler, after the
    /// retry ceiling was exhausted. Carries the last observed error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task's timeout expired before its unit replied.
    #[error("task timed out after {0} ms")]
    Timeout(u64),

    /// The pool was terminated; the task was rejected, not run.
    #[error("worker pool is disposed")]
    Disposed,

    /// The unit executing the task exited before responding and the
    /// retry ceiling was exhausted.
    #[error("execution unit exited before responding")]
    UnitLost,
}

impl TaskError {
    /// Returns true for errors caused by pool shutdown rather than the
    /// task itself.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}
