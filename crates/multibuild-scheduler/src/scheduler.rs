//! Batch execution of build tasks.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use multibuild_core::{BuildConfig, BuildFailure, BuildTask, ExecOptions, VariantResult};
use multibuild_pool::{TaskHandler, WorkerPool};

use crate::report::BuildReport;

/// Method tag for build tasks dispatched through the pool.
pub const BUILD_METHOD: &str = "build";

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum tasks per batch. Batches run strictly in sequence, so
    /// this bounds peak concurrent resource usage deterministically.
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Available parallel hardware units minus one, floor 1.
pub fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

/// The opaque host build function.
///
/// Receives a variant-specialized configuration and produces an opaque
/// result payload. `Err` carries the error text surfaced in the
/// variant's [`BuildFailure`] entry.
#[async_trait]
pub trait VariantBuilder: Send + Sync + 'static {
    async fn build(&self, config: &BuildConfig) -> Result<Value, String>;
}

/// Adapts a [`VariantBuilder`] into a pool [`TaskHandler`], so one host
/// build function serves both pooled and direct dispatch.
pub struct BuildTaskHandler {
    builder: Arc<dyn VariantBuilder>,
}

impl BuildTaskHandler {
    pub fn new(builder: Arc<dyn VariantBuilder>) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl TaskHandler for BuildTaskHandler {
    async fn handle(&self, method: &str, data: Value) -> Result<Value, String> {
        if method != BUILD_METHOD {
            return Err(format!("unknown method '{method}'"));
        }
        let config: BuildConfig =
            serde_json::from_value(data).map_err(|e| format!("invalid build payload: {e}"))?;
        self.builder.build(&config).await
    }
}

/// Runs build tasks in priority order, batched under the concurrency
/// ceiling.
pub struct ParallelBuildScheduler {
    config: SchedulerConfig,
    pool: Option<WorkerPool>,
}

impl ParallelBuildScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config, pool: None }
    }

    /// Dispatch multi-task batches through `pool` instead of invoking
    /// the builder in-process. The pool is expected to run a
    /// [`BuildTaskHandler`] wrapping the same host build function.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Execute all tasks and return the complete per-variant report.
    ///
    /// Failures are caught at the per-task boundary: one variant's
    /// failure never prevents other members of its batch, or any later
    /// batch, from running.
    pub async fn execute_parallel(
        &self,
        tasks: Vec<BuildTask>,
        builder: Arc<dyn VariantBuilder>,
    ) -> BuildReport {
        let mut report = BuildReport::default();
        if tasks.is_empty() {
            return report;
        }

        // Single variant: call the host function directly, bypassing
        // pool and batch machinery entirely.
        if tasks.len() == 1 {
            let task = &tasks[0];
            info!(variant = %task.variant, "single variant requested, building directly");
            let outcome = run_direct(task, builder).await;
            report.insert(task.variant, outcome);
            return report;
        }

        let mut ordered = tasks;
        // Stable: equal priorities keep their original order.
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let batch_size = self.config.max_concurrency.max(1);
        info!(
            tasks = ordered.len(),
            batch_size,
            pooled = self.pool.is_some(),
            "executing parallel build"
        );

        for (index, batch) in ordered.chunks(batch_size).enumerate() {
            debug!(batch = index, size = batch.len(), "starting batch");
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|task| self.run_task(task, builder.clone())),
            )
            .await;
            for (task, outcome) in batch.iter().zip(outcomes) {
                report.insert(task.variant, outcome);
            }
        }
        report
    }

    async fn run_task(
        &self,
        task: &BuildTask,
        builder: Arc<dyn VariantBuilder>,
    ) -> Result<VariantResult, BuildFailure> {
        match &self.pool {
            Some(pool) => run_pooled(pool, task).await,
            None => run_direct(task, builder).await,
        }
    }
}

async fn run_pooled(pool: &WorkerPool, task: &BuildTask) -> Result<VariantResult, BuildFailure> {
    let started = Instant::now();
    let payload = match serde_json::to_value(&task.config) {
        Ok(payload) => payload,
        Err(err) => {
            return Err(BuildFailure {
                variant: task.variant,
                error: format!("cannot serialize build config: {err}"),
            })
        }
    };

    match pool.exec(BUILD_METHOD, payload, ExecOptions::default()).await {
        Ok(reply) => Ok(VariantResult {
            variant: task.variant,
            output: reply.data,
            duration: started.elapsed(),
            unit: Some(reply.unit),
        }),
        Err(err) => {
            warn!(variant = %task.variant, error = %err, "variant build failed");
            Err(BuildFailure {
                variant: task.variant,
                error: err.to_string(),
            })
        }
    }
}

async fn run_direct(
    task: &BuildTask,
    builder: Arc<dyn VariantBuilder>,
) -> Result<VariantResult, BuildFailure> {
    let started = Instant::now();
    let variant = task.variant;
    let config = task.config.clone();

    // Spawned so a panicking host function settles as a failure entry.
    let handle = tokio::spawn(async move { builder.build(&config).await });
    match handle.await {
        Ok(Ok(output)) => Ok(VariantResult {
            variant,
            output,
            duration: started.elapsed(),
            unit: None,
        }),
        Ok(Err(error)) => {
            warn!(variant = %variant, error = %error, "variant build failed");
            Err(BuildFailure { variant, error })
        }
        Err(err) => {
            let error = if err.is_panic() {
                "build function panicked".to_string()
            } else {
                format!("build task aborted: {err}")
            };
            warn!(variant = %variant, error = %error, "variant build failed");
            Err(BuildFailure { variant, error })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::generate_tasks;
    use multibuild_core::{PoolEvent, VariantKind};
    use multibuild_pool::PoolConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        calls: AtomicUsize,
        order: Mutex<Vec<VariantKind>>,
        current: AtomicUsize,
        max: AtomicUsize,
        sleep: Option<Duration>,
        fail: Option<VariantKind>,
        panic_on: Option<VariantKind>,
    }

    #[async_trait]
    impl VariantBuilder for Recording {
        async fn build(&self, config: &BuildConfig) -> Result<Value, String> {
            let variant = config.format.expect("specialized config");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(variant);

            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            if let Some(sleep) = self.sleep {
                tokio::time::sleep(sleep).await;
            }
            self.current.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on == Some(variant) {
                panic!("builder exploded");
            }
            if self.fail == Some(variant) {
                return Err(format!("{variant} build broke"));
            }
            Ok(json!({ "file": config.output_file() }))
        }
    }

    fn three_variant_config() -> BuildConfig {
        BuildConfig::new("mylib", "src/index.ts", "dist")
            .with_variant(VariantKind::Esm)
            .with_variant(VariantKind::Cjs)
            .with_variant(VariantKind::Umd)
    }

    fn scheduler(max_concurrency: usize) -> ParallelBuildScheduler {
        ParallelBuildScheduler::new(SchedulerConfig { max_concurrency })
    }

    #[tokio::test]
    async fn test_empty_tasks_is_nothing_to_do() {
        let report = scheduler(2)
            .execute_parallel(Vec::new(), Arc::new(Recording::default()))
            .await;
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_batches_bound_concurrency() {
        let builder = Arc::new(Recording {
            sleep: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        let tasks = generate_tasks(&three_variant_config());

        let started = Instant::now();
        let report = scheduler(2).execute_parallel(tasks, builder.clone()).await;
        let elapsed = started.elapsed();

        assert_eq!(report.len(), 3);
        assert!(!report.has_failures());
        assert!(builder.max.load(Ordering::SeqCst) <= 2);
        // ceil(3/2) = 2 sequential batches of ~30ms each.
        assert!(elapsed >= Duration::from_millis(50), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_priority_order_with_stable_ties() {
        let builder = Arc::new(Recording::default());
        let tasks = generate_tasks(&three_variant_config());

        let report = scheduler(1).execute_parallel(tasks, builder.clone()).await;
        assert_eq!(report.len(), 3);

        let order = builder.order.lock().unwrap().clone();
        assert_eq!(
            order,
            vec![VariantKind::Umd, VariantKind::Esm, VariantKind::Cjs]
        );
    }

    #[tokio::test]
    async fn test_single_variant_builds_directly() {
        let builder = Arc::new(Recording::default());
        let pool = WorkerPool::new(
            PoolConfig {
                max_workers: 1,
                ..PoolConfig::default()
            },
            Arc::new(BuildTaskHandler::new(builder.clone())),
        );

        let config =
            BuildConfig::new("mylib", "src/index.ts", "dist").with_variant(VariantKind::Esm);
        let report = scheduler(2)
            .with_pool(pool.clone())
            .execute_parallel(generate_tasks(&config), builder.clone())
            .await;

        assert_eq!(report.len(), 1);
        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
        match report.get(VariantKind::Esm) {
            Some(Ok(result)) => assert_eq!(result.unit, None),
            other => panic!("expected success, got {other:?}"),
        }
        // The pool never saw the task.
        assert_eq!(pool.stats().await.unwrap().tasks_completed, 0);
        pool.terminate().await;
    }

    #[tokio::test]
    async fn test_one_failure_never_loses_sibling_results() {
        let builder = Arc::new(Recording {
            fail: Some(VariantKind::Cjs),
            ..Default::default()
        });
        let tasks = generate_tasks(&three_variant_config());

        let report = scheduler(3).execute_parallel(tasks, builder).await;
        assert_eq!(report.len(), 3);
        assert_eq!(report.succeeded().count(), 2);
        assert_eq!(report.failed().count(), 1);

        match report.get(VariantKind::Cjs) {
            Some(Err(failure)) => {
                assert_eq!(failure.variant, VariantKind::Cjs);
                assert!(failure.error.contains("cjs build broke"));
            }
            other => panic!("expected failure entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_builder_becomes_failure_entry() {
        let builder = Arc::new(Recording {
            panic_on: Some(VariantKind::Esm),
            ..Default::default()
        });
        let tasks = generate_tasks(&three_variant_config());

        let report = scheduler(3).execute_parallel(tasks, builder).await;
        assert_eq!(report.len(), 3);
        assert_eq!(report.succeeded().count(), 2);
        match report.get(VariantKind::Esm) {
            Some(Err(failure)) => assert!(failure.error.contains("panicked")),
            other => panic!("expected failure entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pooled_dispatch_reports_unit_indices() {
        let builder = Arc::new(Recording::default());
        let pool = WorkerPool::new(
            PoolConfig {
                max_workers: 2,
                ..PoolConfig::default()
            },
            Arc::new(BuildTaskHandler::new(builder.clone())),
        );
        let mut events = pool.subscribe();

        let tasks = generate_tasks(&three_variant_config());
        let report = scheduler(2)
            .with_pool(pool.clone())
            .execute_parallel(tasks, builder.clone())
            .await;

        assert_eq!(report.len(), 3);
        assert!(!report.has_failures());
        assert!(report.succeeded().all(|r| r.unit.is_some()));
        // The builder ran inside the pool's units, not in-process.
        assert_eq!(pool.stats().await.unwrap().tasks_completed, 3);

        let mut saw_start = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PoolEvent::TaskStarted { .. }) {
                saw_start = true;
            }
        }
        assert!(saw_start);
        pool.terminate().await;
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected_by_handler() {
        let builder = Arc::new(Recording::default());
        let handler = BuildTaskHandler::new(builder);
        let err = handler.handle("transform", json!({})).await.unwrap_err();
        assert!(err.contains("unknown method"));
    }
}
