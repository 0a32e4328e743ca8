//! Pending-task queue.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use multibuild_core::{TaskError, TaskId};

use crate::pool::TaskReply;

/// A task waiting in the queue or running on a unit.
///
/// Owns its completion continuation; settled exactly once, by whichever
/// of {reply, timeout, unit exit, shutdown} reaches it first.
pub(crate) struct QueuedTask {
    pub id: TaskId,
    pub method: String,
    pub payload: Value,
    pub reply: oneshot::Sender<Result<TaskReply, TaskError>>,
    pub timeout: Duration,
    pub retries: u32,
    pub max_retries: u32,
}

/// Ordered list of pending work.
#[derive(Default)]
pub(crate) struct TaskQueue {
    inner: VecDeque<QueuedTask>,
}

impl TaskQueue {
    /// Append fresh work at the tail.
    pub(crate) fn push_back(&mut self, task: QueuedTask) {
        self.inner.push_back(task);
    }

    /// Re-insert retried work at the head: retries take precedence over
    /// fresh work. Under sustained transient failures this can delay
    /// fresh tasks indefinitely (see DESIGN.md).
    pub(crate) fn requeue(&mut self, task: QueuedTask) {
        self.inner.push_front(task);
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueuedTask> {
        self.inner.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Take every pending task, emptying the queue. Used at shutdown to
    /// reject still-queued work.
    pub(crate) fn drain_all(&mut self) -> Vec<QueuedTask> {
        self.inner.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn task(id: u64) -> QueuedTask {
        let (reply, _rx) = oneshot::channel();
        QueuedTask {
            id: TaskId::new(id),
            method: "build".into(),
            payload: Value::Null,
            reply,
            timeout: Duration::from_secs(1),
            retries: 0,
            max_retries: 0,
        }
    }

    #[test]
    fn test_fifo_with_retry_precedence() {
        let mut queue = TaskQueue::default();
        queue.push_back(task(1));
        queue.push_back(task(2));
        queue.requeue(task(3));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop_front())
            .map(|t| t.id.as_u64())
            .collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_all_empties_queue() {
        let mut queue = TaskQueue::default();
        queue.push_back(task(1));
        queue.push_back(task(2));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }
}
