//! Delayed task queue abstractions.
//!
//! Escalation steps, automatic unsilencing and per-user notification walks
//! all run as independently queued units of work. Delivery is at-least-once:
//! a task may be handed to a handler more than once, and tasks with different
//! `run_at` values are only ordered in the sense of "not before". Consumers
//! must therefore be idempotent; see the staleness checks in the escalation
//! engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ids::{AlertGroupId, UserId};

/// What a scheduled task should do when it is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Execute the next escalation policy step for an alert group.
    EscalationStep {
        alert_group_id: AlertGroupId,
        /// Fencing token; must match the group's active escalation id.
        escalation_id: Uuid,
        /// Snapshot cursor position this task was scheduled for.
        expected_order: usize,
    },
    /// Automatically lift a timed silence.
    Unsilence { alert_group_id: AlertGroupId },
    /// Execute one step of a user's personal notification chain.
    NotifyUser {
        alert_group_id: AlertGroupId,
        user_id: UserId,
        /// Order of the last attempted policy step, None to start at the top.
        previous_policy_order: Option<u16>,
        important: bool,
    },
}

/// A unit of work scheduled for a future point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique task identifier
    pub id: Uuid,
    /// Earliest time the task may be delivered
    pub run_at: DateTime<Utc>,
    /// What to do on delivery
    pub kind: TaskKind,
}

impl ScheduledTask {
    /// Create a new task.
    pub fn new(run_at: DateTime<Utc>, kind: TaskKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_at,
            kind,
        }
    }
}

/// Consumer side of the queue.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Handle one delivered task. Handlers must tolerate duplicate delivery.
    async fn handle(&self, task: ScheduledTask);
}

/// Producer side of the queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task for future delivery. An error means the task was NOT
    /// accepted and the caller is responsible for durably recording it.
    async fn enqueue(&self, task: ScheduledTask) -> Result<()>;
}

/// In-process queue driven by the tokio timer.
///
/// Each enqueued task gets its own spawned delivery; there is no shared loop
/// that could head-of-line block on a slow handler.
pub struct TokioTaskQueue {
    handler: tokio::sync::RwLock<Option<Arc<dyn TaskHandler>>>,
}

impl TokioTaskQueue {
    /// Create a queue with no handler registered yet.
    pub fn new() -> Self {
        Self {
            handler: tokio::sync::RwLock::new(None),
        }
    }

    /// Register the handler that receives delivered tasks.
    /// This must be called after construction as it requires async access.
    pub async fn set_handler(&self, handler: Arc<dyn TaskHandler>) {
        *self.handler.write().await = Some(handler);
    }
}

impl Default for TokioTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for TokioTaskQueue {
    async fn enqueue(&self, task: ScheduledTask) -> Result<()> {
        let handler = self
            .handler
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Queue("no task handler registered".to_string()))?;

        let delay = (task.run_at - Utc::now()).to_std().unwrap_or_default();
        tracing::debug!(
            task_id = %task.id,
            delay_ms = delay.as_millis() as u64,
            "Enqueued task"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handler.handle(task).await;
        });
        Ok(())
    }
}

/// In-memory queue for tests.
///
/// Collects tasks for manual delivery, which lets tests deliver a task twice
/// or late to exercise the at-least-once semantics. Can be switched into a
/// failing mode to simulate a broker outage.
#[derive(Clone)]
pub struct MemoryTaskQueue {
    tasks: Arc<Mutex<Vec<ScheduledTask>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take all currently enqueued tasks.
    pub fn drain(&self) -> Vec<ScheduledTask> {
        std::mem::take(&mut *self.tasks.lock())
    }

    /// Number of enqueued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Make subsequent enqueues fail, simulating broker unavailability.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: ScheduledTask) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Queue("queue unavailable".to_string()));
        }
        self.tasks.lock().push(task);
        Ok(())
    }
}
