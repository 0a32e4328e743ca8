//! Bounded pool of isolated execution units.
//!
//! A [`WorkerPool`] owns a fixed set of execution units (isolated tokio
//! tasks reachable only by message passing) and one task queue. Work
//! submitted via [`WorkerPool::exec`] is dispatched to an idle unit or
//! queued, with per-task timeouts, retries with head-of-queue
//! precedence, and crash replacement. All control-plane bookkeeping
//! (queue mutation, unit assignment, counters) happens on a single
//! actor task, so control state is never mutated concurrently.

mod handler;
mod memory;
mod pool;
mod queue;
mod stats;
mod unit;

pub use handler::TaskHandler;
pub use pool::{MemoryPressureHook, PoolConfig, TaskReply, WorkerPool};
pub use stats::PoolStats;
