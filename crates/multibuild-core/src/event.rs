//! Observable pool notifications.
//!
//! Events are consumed by logging/telemetry collaborators and are never
//! required for correctness. Listeners may lag or disconnect freely.

use crate::{TaskId, UnitId};

/// Notification emitted by the worker pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// An execution unit was spawned (at startup or as a replacement).
    UnitSpawned { unit: UnitId, slot: usize },

    /// An execution unit exited unexpectedly or panicked.
    UnitError {
        unit: UnitId,
        slot: usize,
        error: String,
    },

    /// A task was appended to the queue (no idle unit was available).
    TaskQueued {
        task_id: TaskId,
        queue_depth: usize,
    },

    /// A task was dispatched to a unit.
    TaskStarted {
        task_id: TaskId,
        unit: UnitId,
        slot: usize,
    },

    /// A task completed successfully.
    TaskCompleted {
        task_id: TaskId,
        slot: usize,
        duration_ms: u64,
    },

    /// A task attempt failed. `will_retry` distinguishes a requeue from
    /// a terminal rejection.
    TaskFailed {
        task_id: TaskId,
        error: String,
        will_retry: bool,
    },

    /// A task's timeout expired before its unit replied.
    TaskTimeout {
        task_id: TaskId,
        slot: usize,
        timeout_ms: u64,
    },

    /// Process memory crossed the configured threshold. Advisory only.
    MemoryWarning {
        used_bytes: u64,
        threshold_bytes: u64,
    },

    /// The pool was terminated.
    PoolTerminated,
}
