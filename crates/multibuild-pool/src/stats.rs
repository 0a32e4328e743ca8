//! Aggregate pool statistics.

use chrono::{DateTime, Utc};
use multibuild_core::TaskStatus;
use serde::Serialize;

/// Computed-on-demand snapshot of pool state.
///
/// Ephemeral and advisory; the actor's own state is authoritative.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Configured unit count (constant for the pool's lifetime).
    pub total_units: usize,
    /// Units ready to accept work.
    pub idle_units: usize,
    /// Units currently executing a task.
    pub busy_units: usize,
    /// Tasks waiting in the queue.
    pub queue_depth: usize,
    /// Tasks currently dispatched to units.
    pub tasks_running: usize,
    /// Tasks settled successfully.
    pub tasks_completed: u64,
    /// Tasks settled with a terminal failure (including timeouts).
    pub tasks_failed: u64,
    /// Mean duration of completed tasks, in milliseconds.
    pub average_task_ms: f64,
    /// Last sampled process memory usage, in bytes.
    pub memory_bytes: u64,
    /// Milliseconds since the pool was created.
    pub uptime_ms: u64,
    /// When this snapshot was captured.
    pub captured_at: DateTime<Utc>,
}

impl PoolStats {
    /// Task count for a lifecycle state at capture time.
    pub fn count(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.queue_depth as u64,
            TaskStatus::Running => self.tasks_running as u64,
            TaskStatus::Completed => self.tasks_completed,
            TaskStatus::Failed => self.tasks_failed,
        }
    }
}
