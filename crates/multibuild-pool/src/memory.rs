//! Periodic process-memory sampling.

use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, System};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::warn;

use crate::pool::PoolMsg;

/// Spawn the periodic sampler feeding the pool mailbox.
///
/// Samples are advisory: crossing the threshold produces a warning and
/// an event, never backpressure on in-flight work.
pub(crate) fn spawn_sampler(tx: mpsc::Sender<PoolMsg>, interval: Duration) -> AbortHandle {
    let task = tokio::spawn(async move {
        let pid: Pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(err) => {
                warn!(error = err, "cannot resolve current pid, memory sampling disabled");
                return;
            }
        };
        let mut system = System::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::everything(),
            );
            let used_bytes = system.process(pid).map(|p| p.memory()).unwrap_or(0);
            if tx.send(PoolMsg::MemorySample { used_bytes }).await.is_err() {
                break;
            }
        }
    });
    task.abort_handle()
}
