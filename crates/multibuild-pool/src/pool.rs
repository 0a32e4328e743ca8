//! Worker pool: dispatch, timeouts, retries, crash replacement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, trace, warn};

use multibuild_core::{
    ExecOptions, PoolEvent, TaskError, TaskId, TaskRequest, TaskResponse, UnitId, UnitStatus,
};

use crate::handler::TaskHandler;
use crate::memory;
use crate::queue::{QueuedTask, TaskQueue};
use crate::stats::PoolStats;
use crate::unit::ExecutionUnit;

const MAILBOX_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Callback invoked when sampled memory crosses the configured
/// threshold. Receives the sampled usage in bytes.
pub type MemoryPressureHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of execution units. Constant for the pool's lifetime;
    /// crash replacement keeps the count at this value.
    pub max_workers: usize,

    /// Default per-task timeout. Overridable per call via
    /// [`ExecOptions::timeout`].
    pub task_timeout: Duration,

    /// Replace units that time out or exit unexpectedly.
    pub auto_restart: bool,

    /// Memory usage (bytes) above which advisory warnings are emitted.
    pub memory_threshold: u64,

    /// How often process memory is sampled.
    pub memory_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            task_timeout: Duration::from_secs(30),
            auto_restart: true,
            memory_threshold: 1024 * 1024 * 1024,
            memory_check_interval: Duration::from_secs(10),
        }
    }
}

/// Available parallel hardware units minus one, floor 1.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

/// Settled value of a successful pool task.
#[derive(Debug, Clone)]
pub struct TaskReply {
    /// Opaque result payload from the handler.
    pub data: Value,

    /// Slot index of the unit that executed the task.
    pub unit: usize,

    /// Wall-clock duration from dispatch to reply.
    pub duration: Duration,
}

/// Messages into the pool actor. Everything that mutates control state
/// arrives here; the actor is the only mutator.
pub(crate) enum PoolMsg {
    Exec {
        method: String,
        payload: Value,
        opts: ExecOptions,
        reply: oneshot::Sender<Result<TaskReply, TaskError>>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    SetMemoryHook {
        hook: MemoryPressureHook,
    },
    Terminate {
        reply: oneshot::Sender<()>,
    },
    UnitReply {
        slot: usize,
        task_id: TaskId,
        response: TaskResponse,
    },
    UnitExited {
        slot: usize,
        unit: UnitId,
        crashed: bool,
    },
    TaskTimeout {
        task_id: TaskId,
    },
    MemorySample {
        used_bytes: u64,
    },
}

/// Handle to a running worker pool.
///
/// Cheap to clone; all clones talk to the same actor. After
/// [`terminate`](WorkerPool::terminate), every operation fails fast
/// with [`TaskError::Disposed`].
#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::Sender<PoolMsg>,
    events: broadcast::Sender<PoolEvent>,
}

impl WorkerPool {
    /// Create a pool with `config.max_workers` units all running
    /// `handler`. Must be called from within a tokio runtime.
    pub fn new(config: PoolConfig, handler: Arc<dyn TaskHandler>) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let sampler = memory::spawn_sampler(tx.clone(), config.memory_check_interval);
        let actor = PoolActor::new(config, handler, tx.clone(), events.clone(), sampler);
        tokio::spawn(actor.run(rx));

        Self { tx, events }
    }

    /// Submit a task and wait for it to settle.
    pub async fn exec(
        &self,
        method: impl Into<String>,
        payload: Value,
        opts: ExecOptions,
    ) -> Result<TaskReply, TaskError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PoolMsg::Exec {
                method: method.into(),
                payload,
                opts,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TaskError::Disposed)?;
        reply_rx.await.map_err(|_| TaskError::Disposed)?
    }

    /// Capture a statistics snapshot.
    pub async fn stats(&self) -> Result<PoolStats, TaskError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PoolMsg::Stats { reply: reply_tx })
            .await
            .map_err(|_| TaskError::Disposed)?;
        reply_rx.await.map_err(|_| TaskError::Disposed)
    }

    /// Install the advisory callback invoked on memory-threshold
    /// crossings.
    pub async fn set_memory_pressure_hook(&self, hook: MemoryPressureHook) -> Result<(), TaskError> {
        self.tx
            .send(PoolMsg::SetMemoryHook { hook })
            .await
            .map_err(|_| TaskError::Disposed)
    }

    /// Subscribe to pool notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Pool notifications as a stream.
    pub fn events(&self) -> BroadcastStream<PoolEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Shut the pool down: reject everything still queued or running
    /// with [`TaskError::Disposed`] and terminate all units. Idempotent.
    pub async fn terminate(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(PoolMsg::Terminate { reply: reply_tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = reply_rx.await;
    }
}

struct UnitSlot {
    unit: ExecutionUnit,
    status: UnitStatus,
    completed: u64,
    last_duration: Option<Duration>,
}

impl UnitSlot {
    fn new(unit: ExecutionUnit) -> Self {
        Self {
            unit,
            status: UnitStatus::Idle,
            completed: 0,
            last_duration: None,
        }
    }
}

struct RunningTask {
    task: QueuedTask,
    slot: usize,
    started: Instant,
    watchdog: AbortHandle,
}

/// The single owner of all pool control state. Concurrency exists only
/// between units executing work, never between control operations.
struct PoolActor {
    config: PoolConfig,
    handler: Arc<dyn TaskHandler>,
    self_tx: mpsc::Sender<PoolMsg>,
    events: broadcast::Sender<PoolEvent>,
    sampler: AbortHandle,
    units: Vec<UnitSlot>,
    queue: TaskQueue,
    running: HashMap<TaskId, RunningTask>,
    next_task_id: u64,
    completed: u64,
    failed: u64,
    total_task_ms: u64,
    memory_bytes: u64,
    memory_hook: Option<MemoryPressureHook>,
    started: Instant,
}

impl PoolActor {
    fn new(
        mut config: PoolConfig,
        handler: Arc<dyn TaskHandler>,
        self_tx: mpsc::Sender<PoolMsg>,
        events: broadcast::Sender<PoolEvent>,
        sampler: AbortHandle,
    ) -> Self {
        config.max_workers = config.max_workers.max(1);
        Self {
            config,
            handler,
            self_tx,
            events,
            sampler,
            units: Vec::new(),
            queue: TaskQueue::default(),
            running: HashMap::new(),
            next_task_id: 0,
            completed: 0,
            failed: 0,
            total_task_ms: 0,
            memory_bytes: 0,
            memory_hook: None,
            started: Instant::now(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<PoolMsg>) {
        self.spawn_units();

        while let Some(msg) = rx.recv().await {
            match msg {
                PoolMsg::Exec {
                    method,
                    payload,
                    opts,
                    reply,
                } => self.on_exec(method, payload, opts, reply).await,
                PoolMsg::UnitReply {
                    slot,
                    task_id,
                    response,
                } => self.on_reply(slot, task_id, response).await,
                PoolMsg::TaskTimeout { task_id } => self.on_timeout(task_id).await,
                PoolMsg::UnitExited {
                    slot,
                    unit,
                    crashed,
                } => self.on_unit_exit(slot, unit, crashed).await,
                PoolMsg::MemorySample { used_bytes } => self.on_memory_sample(used_bytes),
                PoolMsg::Stats { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                PoolMsg::SetMemoryHook { hook } => {
                    self.memory_hook = Some(hook);
                }
                PoolMsg::Terminate { reply } => {
                    self.shutdown();
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    fn spawn_units(&mut self) {
        for slot in 0..self.config.max_workers {
            let unit = ExecutionUnit::spawn(slot, self.handler.clone(), self.self_tx.clone());
            info!(unit_id = %unit.id(), slot, "spawned execution unit");
            self.emit(PoolEvent::UnitSpawned {
                unit: unit.id().clone(),
                slot,
            });
            self.units.push(UnitSlot::new(unit));
        }
    }

    async fn on_exec(
        &mut self,
        method: String,
        payload: Value,
        opts: ExecOptions,
        reply: oneshot::Sender<Result<TaskReply, TaskError>>,
    ) {
        self.next_task_id += 1;
        let id = TaskId::new(self.next_task_id);
        let task = QueuedTask {
            id,
            method,
            payload,
            reply,
            timeout: opts.timeout.unwrap_or(self.config.task_timeout),
            retries: 0,
            max_retries: opts.max_retries,
        };

        match self.idle_slot() {
            Some(slot) => self.dispatch(slot, task).await,
            None => {
                self.queue.push_back(task);
                debug!(task_id = %id, depth = self.queue.len(), "no idle unit, queued task");
                self.emit(PoolEvent::TaskQueued {
                    task_id: id,
                    queue_depth: self.queue.len(),
                });
            }
        }
    }

    async fn dispatch(&mut self, slot: usize, task: QueuedTask) {
        let task_id = task.id;
        let timeout = task.timeout;
        let request = TaskRequest {
            id: task_id,
            method: task.method.clone(),
            data: task.payload.clone(),
        };

        let unit_id = self.units[slot].unit.id().clone();
        self.units[slot].status = UnitStatus::Busy;

        let tx = self.self_tx.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(PoolMsg::TaskTimeout { task_id }).await;
        })
        .abort_handle();

        debug!(task_id = %task_id, unit_id = %unit_id, slot, "dispatching task");
        self.emit(PoolEvent::TaskStarted {
            task_id,
            unit: unit_id,
            slot,
        });

        let delivered = self.units[slot].unit.send(request).await;
        self.running.insert(
            task_id,
            RunningTask {
                task,
                slot,
                started: Instant::now(),
                watchdog,
            },
        );

        if !delivered {
            // Dead unit; its exit notice will trigger replacement.
            if let Some(run) = self.running.remove(&task_id) {
                run.watchdog.abort();
                self.units[slot].status = UnitStatus::Terminated;
                self.retry_or_reject(
                    run.task,
                    "execution unit unavailable".to_string(),
                    TaskError::UnitLost,
                );
            }
        }
    }

    async fn on_reply(&mut self, slot: usize, task_id: TaskId, response: TaskResponse) {
        let Some(run) = self.running.remove(&task_id) else {
            trace!(task_id = %task_id, slot, "discarding reply for settled task");
            return;
        };
        run.watchdog.abort();
        let duration = run.started.elapsed();
        self.units[run.slot].status = UnitStatus::Idle;

        match response.into_result() {
            Ok(data) => {
                let duration_ms = duration.as_millis() as u64;
                let unit_state = &mut self.units[run.slot];
                unit_state.completed += 1;
                unit_state.last_duration = Some(duration);
                self.completed += 1;
                self.total_task_ms += duration_ms;

                debug!(task_id = %task_id, duration_ms, "task completed");
                self.emit(PoolEvent::TaskCompleted {
                    task_id,
                    slot: run.slot,
                    duration_ms,
                });
                let _ = run.task.reply.send(Ok(TaskReply {
                    data,
                    unit: run.slot,
                    duration,
                }));
            }
            Err(error) => {
                let terminal = TaskError::Failed(error.clone());
                self.retry_or_reject(run.task, error, terminal);
            }
        }
        self.drain().await;
    }

    async fn on_timeout(&mut self, task_id: TaskId) {
        let Some(run) = self.running.remove(&task_id) else {
            return;
        };
        let timeout_ms = run.task.timeout.as_millis() as u64;
        warn!(task_id = %task_id, slot = run.slot, timeout_ms, "task timed out");

        self.units[run.slot].status = UnitStatus::Idle;
        self.failed += 1;
        self.emit(PoolEvent::TaskTimeout {
            task_id,
            slot: run.slot,
            timeout_ms,
        });
        let _ = run.task.reply.send(Err(TaskError::Timeout(timeout_ms)));

        if self.config.auto_restart {
            self.replace_unit(run.slot);
        }
        self.drain().await;
    }

    async fn on_unit_exit(&mut self, slot: usize, unit: UnitId, crashed: bool) {
        // Exits of already-replaced units are expected; only the unit
        // currently occupying the slot matters.
        if self.units.get(slot).map(|s| s.unit.id()) != Some(&unit) {
            return;
        }

        let reason = if crashed {
            "execution unit panicked"
        } else {
            "execution unit exited unexpectedly"
        };
        error!(unit_id = %unit, slot, reason, "lost execution unit");
        self.emit(PoolEvent::UnitError {
            unit,
            slot,
            error: reason.to_string(),
        });
        self.units[slot].status = UnitStatus::Terminated;

        // Whatever was in flight on that unit can no longer report
        // completion; settle it through the retry path.
        let in_flight = self
            .running
            .iter()
            .find(|(_, run)| run.slot == slot)
            .map(|(id, _)| *id);
        if let Some(task_id) = in_flight {
            if let Some(run) = self.running.remove(&task_id) {
                run.watchdog.abort();
                self.retry_or_reject(run.task, reason.to_string(), TaskError::UnitLost);
            }
        }

        if self.config.auto_restart {
            self.replace_unit(slot);
            self.drain().await;
        }
    }

    fn retry_or_reject(&mut self, mut task: QueuedTask, error: String, terminal: TaskError) {
        if task.retries < task.max_retries {
            task.retries += 1;
            warn!(
                task_id = %task.id,
                retries = task.retries,
                max_retries = task.max_retries,
                error = %error,
                "task attempt failed, requeueing"
            );
            self.emit(PoolEvent::TaskFailed {
                task_id: task.id,
                error,
                will_retry: true,
            });
            self.queue.requeue(task);
        } else {
            warn!(task_id = %task.id, error = %error, "task failed terminally");
            self.failed += 1;
            self.emit(PoolEvent::TaskFailed {
                task_id: task.id,
                error,
                will_retry: false,
            });
            let _ = task.reply.send(Err(terminal));
        }
    }

    fn replace_unit(&mut self, slot: usize) {
        let fresh = ExecutionUnit::spawn(slot, self.handler.clone(), self.self_tx.clone());
        info!(unit_id = %fresh.id(), slot, "spawned replacement unit");
        self.emit(PoolEvent::UnitSpawned {
            unit: fresh.id().clone(),
            slot,
        });
        let mut old = std::mem::replace(&mut self.units[slot], UnitSlot::new(fresh));
        old.unit.begin_terminate(SHUTDOWN_GRACE);
    }

    /// Assign queued tasks to units as they become idle.
    async fn drain(&mut self) {
        while !self.queue.is_empty() {
            let Some(slot) = self.idle_slot() else {
                break;
            };
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            self.dispatch(slot, task).await;
        }
    }

    fn idle_slot(&self) -> Option<usize> {
        self.units.iter().position(|slot| slot.status.can_accept())
    }

    fn on_memory_sample(&mut self, used_bytes: u64) {
        self.memory_bytes = used_bytes;
        if used_bytes > self.config.memory_threshold {
            warn!(
                used_bytes,
                threshold_bytes = self.config.memory_threshold,
                "memory usage above threshold"
            );
            self.emit(PoolEvent::MemoryWarning {
                used_bytes,
                threshold_bytes: self.config.memory_threshold,
            });
            if let Some(hook) = &self.memory_hook {
                hook(used_bytes);
            }
        }
    }

    fn shutdown(&mut self) {
        info!(
            queued = self.queue.len(),
            running = self.running.len(),
            "terminating worker pool"
        );
        self.sampler.abort();

        for task in self.queue.drain_all() {
            let _ = task.reply.send(Err(TaskError::Disposed));
        }
        for (_, run) in self.running.drain() {
            run.watchdog.abort();
            let _ = run.task.reply.send(Err(TaskError::Disposed));
        }
        for slot in &mut self.units {
            slot.unit.begin_terminate(SHUTDOWN_GRACE);
            slot.status = UnitStatus::Terminated;
        }
        self.emit(PoolEvent::PoolTerminated);
    }

    fn snapshot(&self) -> PoolStats {
        let mut idle_units = 0;
        let mut busy_units = 0;
        for slot in &self.units {
            match slot.status {
                UnitStatus::Idle => idle_units += 1,
                UnitStatus::Busy => busy_units += 1,
                UnitStatus::Terminated => {}
            }
        }
        let average_task_ms = if self.completed > 0 {
            self.total_task_ms as f64 / self.completed as f64
        } else {
            0.0
        };

        PoolStats {
            total_units: self.units.len(),
            idle_units,
            busy_units,
            queue_depth: self.queue.len(),
            tasks_running: self.running.len(),
            tasks_completed: self.completed,
            tasks_failed: self.failed,
            average_task_ms,
            memory_bytes: self.memory_bytes,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            captured_at: Utc::now(),
        }
    }

    fn emit(&self, event: PoolEvent) {
        let _ = self.events.send(event);
    }
}
