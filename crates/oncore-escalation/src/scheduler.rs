//! Escalation scheduling.
//!
//! The scheduler is a thin layer over the task queue with two jobs:
//!
//! - **Fencing**: every (re)armed escalation gets a fresh escalation id
//!   stamped on the alert group. Cancellation is advisory; it rotates the
//!   stamp so that in-flight task deliveries see a mismatch and no-op. The
//!   engine's staleness checks are the real safety net, not cancellation.
//! - **Persist-then-retry**: an enqueue failure is durably recorded in the
//!   pending task store and replayed later. Losing a scheduled escalation
//!   step would be a correctness bug, not a degradation.

use std::sync::Arc;

use oncore_core::queue::{ScheduledTask, TaskQueue};
use oncore_storage::PendingTaskStore;

use crate::alert_group::AlertGroup;
use crate::error::Result;

/// Delayed-task driver for the escalation engine.
pub struct EscalationScheduler {
    queue: Arc<dyn TaskQueue>,
    pending: Option<Arc<PendingTaskStore>>,
}

impl EscalationScheduler {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            queue,
            pending: None,
        }
    }

    /// Attach a durable buffer for tasks that fail to enqueue.
    pub fn with_pending_store(mut self, store: Arc<PendingTaskStore>) -> Self {
        self.pending = Some(store);
        self
    }

    /// Advisory cancellation of pending escalation work for a group.
    ///
    /// Rotates the fencing stamp; already-delivered or in-flight tasks
    /// detect the mismatch at run time. The caller persists the group.
    pub fn cancel(&self, group: &mut AlertGroup) {
        group.active_escalation_id = None;
        group.is_escalation_finished = true;
    }

    /// Enqueue a task, falling back to the pending store on queue failure.
    pub async fn submit(&self, task: ScheduledTask) {
        if let Err(e) = self.queue.enqueue(task.clone()).await {
            tracing::warn!(
                task_id = %task.id,
                error = %e,
                "Task enqueue failed, persisting for replay"
            );
            match &self.pending {
                Some(store) => {
                    if let Err(persist_err) = store.append(&task) {
                        tracing::error!(
                            task_id = %task.id,
                            error = %persist_err,
                            "Failed to persist task for replay; scheduled work may be lost"
                        );
                    }
                }
                None => {
                    tracing::error!(
                        task_id = %task.id,
                        "No pending task store configured; scheduled work may be lost"
                    );
                }
            }
        }
    }

    /// Re-enqueue previously persisted tasks. Returns how many made it back
    /// onto the queue; tasks that fail again stay persisted.
    pub async fn replay_pending(&self) -> Result<usize> {
        let Some(store) = &self.pending else {
            return Ok(0);
        };

        let mut replayed = 0;
        for task in store.list()? {
            match self.queue.enqueue(task.clone()).await {
                Ok(()) => {
                    store.remove(&task.id)?;
                    replayed += 1;
                }
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Replay enqueue failed");
                }
            }
        }

        if replayed > 0 {
            tracing::info!(replayed, "Replayed pending scheduled tasks");
        }
        Ok(replayed)
    }
}
