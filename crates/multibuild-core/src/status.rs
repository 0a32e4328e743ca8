//! Status enums for pool tasks and execution units.

use serde::{Deserialize, Serialize};

/// Status of a task inside the worker pool.
///
/// Tasks move `Pending -> Running -> {Completed | Failed}`. A retryable
/// failure moves a task from `Running` back to `Pending` (it re-enters
/// the queue ahead of fresh work).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task is queued, waiting for an idle unit.
    #[default]
    Pending,
    /// Task has been dispatched to a unit.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed terminally (retries exhausted, timeout, or pool disposed).
    Failed,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the task is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Status of an execution unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    /// Unit is idle and ready to accept a task.
    #[default]
    Idle,
    /// Unit is executing a task.
    Busy,
    /// Unit has been terminated and will not accept work.
    Terminated,
}

impl UnitStatus {
    /// Returns true if the unit can be assigned a task right now.
    pub fn can_accept(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_unit_status_can_accept() {
        assert!(UnitStatus::Idle.can_accept());
        assert!(!UnitStatus::Busy.can_accept());
        assert!(!UnitStatus::Terminated.can_accept());
    }
}
