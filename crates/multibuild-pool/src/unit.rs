//! Execution units: isolated workers that run one task at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use multibuild_core::{TaskRequest, TaskResponse, UnitId};

use crate::handler::TaskHandler;
use crate::pool::PoolMsg;

const REQUEST_CAPACITY: usize = 32;

/// One isolated, independently scheduled worker.
///
/// A unit shares no state with its owner. It receives [`TaskRequest`]s
/// over its request channel and posts exactly one [`TaskResponse`] per
/// request into the pool mailbox. A monitor task observes the unit's
/// exit (normal, panic, or forced stop) and reports it to the pool.
pub(crate) struct ExecutionUnit {
    id: UnitId,
    req_tx: Option<mpsc::Sender<TaskRequest>>,
    abort: AbortHandle,
}

impl ExecutionUnit {
    pub(crate) fn spawn(
        slot: usize,
        handler: Arc<dyn TaskHandler>,
        pool_tx: mpsc::Sender<PoolMsg>,
    ) -> Self {
        let id = UnitId::generate();
        let (req_tx, mut req_rx) = mpsc::channel::<TaskRequest>(REQUEST_CAPACITY);

        let loop_tx = pool_tx.clone();
        let loop_id = id.clone();
        let worker = tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                let task_id = request.id;
                trace!(
                    unit_id = %loop_id,
                    task_id = %task_id,
                    method = %request.method,
                    "unit picked up task"
                );
                let response = match handler.handle(&request.method, request.data).await {
                    Ok(data) => TaskResponse::ok(data),
                    Err(error) => TaskResponse::err(error),
                };
                if loop_tx
                    .send(PoolMsg::UnitReply {
                        slot,
                        task_id,
                        response,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        let abort = worker.abort_handle();

        // Exit observer. A panicked handler surfaces here as a crash;
        // channel closure and forced stops are ordinary exits.
        let monitor_id = id.clone();
        tokio::spawn(async move {
            let crashed = match worker.await {
                Ok(()) => false,
                Err(err) => err.is_panic(),
            };
            debug!(unit_id = %monitor_id, slot, crashed, "execution unit exited");
            let _ = pool_tx
                .send(PoolMsg::UnitExited {
                    slot,
                    unit: monitor_id,
                    crashed,
                })
                .await;
        });

        Self {
            id,
            req_tx: Some(req_tx),
            abort,
        }
    }

    pub(crate) fn id(&self) -> &UnitId {
        &self.id
    }

    /// Send a request to the unit. Returns false if the unit is gone.
    pub(crate) async fn send(&self, request: TaskRequest) -> bool {
        match &self.req_tx {
            Some(tx) => tx.send(request).await.is_ok(),
            None => false,
        }
    }

    /// Graceful shutdown: close the request channel so the receive loop
    /// exits after its current task, with a forced stop once `grace`
    /// elapses.
    pub(crate) fn begin_terminate(&mut self, grace: Duration) {
        self.req_tx = None;
        let abort = self.abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            abort.abort();
        });
    }
}
