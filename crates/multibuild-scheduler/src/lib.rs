//! Parallel build scheduler.
//!
//! Converts a build configuration plus its enabled output variants into
//! independent tasks, batches them under a concurrency ceiling, and
//! dispatches each batch either through a [`multibuild_pool::WorkerPool`]
//! or directly in-process. Per-variant results are aggregated into a
//! complete [`BuildReport`]; one variant's failure never aborts the
//! others.

mod report;
mod scheduler;
mod tasks;

pub use report::BuildReport;
pub use scheduler::{
    default_max_concurrency, BuildTaskHandler, ParallelBuildScheduler, SchedulerConfig,
    VariantBuilder, BUILD_METHOD,
};
pub use tasks::generate_tasks;
