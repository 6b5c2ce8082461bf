//! Alert group state machine.
//!
//! Owns the firing/acknowledged/resolved/silenced lifecycle and the side
//! effects of each transition: audit records, escalation fencing, and
//! re-arming the walk. Transitions serialize per alert group: every method
//! takes the group's lock, re-reads current state, applies the change
//! through the repository's compare-and-set, and only then emits scheduled
//! tasks. No network I/O happens while the lock is held.
//!
//! Invalid transition requests are no-ops reported as `NoChange`, never
//! errors; a batch caller must not be aborted by a lost race.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use oncore_core::ids::{AlertGroupId, UserId};
use oncore_core::queue::{ScheduledTask, TaskKind};

use crate::alert_group::{Alert, AlertGroup, AlertGroupState};
use crate::chain::RoutingProvider;
use crate::config::EscalationConfig;
use crate::error::{Error, Result};
use crate::log_records::{AlertGroupLogRecord, AlertGroupLogType, AuditLog};
use crate::repository::AlertGroupRepository;
use crate::scheduler::EscalationScheduler;
use crate::snapshot::EscalationSnapshot;

/// Result of a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied.
    Applied,
    /// Preconditions did not hold; nothing changed.
    NoChange,
}

impl TransitionOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Per-alert-group async locks.
///
/// Contention is only ever group-vs-itself (concurrent task deliveries or
/// concurrent user actions on the same group); different groups never share
/// a lock.
#[derive(Default)]
pub struct LockRegistry {
    inner: Mutex<HashMap<AlertGroupId, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock for one alert group.
    pub fn lock_handle(&self, id: &AlertGroupId) -> Arc<AsyncMutex<()>> {
        self.inner
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Owns alert group lifecycle transitions and their side effects.
pub struct AlertGroupStateMachine {
    repository: Arc<dyn AlertGroupRepository>,
    routing: Arc<dyn RoutingProvider>,
    scheduler: Arc<EscalationScheduler>,
    audit: Arc<dyn AuditLog>,
    locks: Arc<LockRegistry>,
    config: EscalationConfig,
}

impl AlertGroupStateMachine {
    pub fn new(
        repository: Arc<dyn AlertGroupRepository>,
        routing: Arc<dyn RoutingProvider>,
        scheduler: Arc<EscalationScheduler>,
        audit: Arc<dyn AuditLog>,
        locks: Arc<LockRegistry>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            repository,
            routing,
            scheduler,
            audit,
            locks,
            config,
        }
    }

    async fn load(&self, id: &AlertGroupId) -> Result<AlertGroup> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Alert group not found: {}", id)))
    }

    /// Acknowledge a firing alert group.
    pub async fn acknowledge(&self, id: &AlertGroupId, by: UserId) -> Result<TransitionOutcome> {
        let lock = self.locks.lock_handle(id);
        let _guard = lock.lock().await;

        let mut group = self.load(id).await?;
        if group.state != AlertGroupState::Firing {
            tracing::debug!(alert_group_id = %id, state = %group.state, "Acknowledge is a no-op");
            return Ok(TransitionOutcome::NoChange);
        }

        let now = Utc::now();
        group.state = AlertGroupState::Acknowledged;
        group.acknowledged_at = Some(now);
        group.acknowledged_by = Some(by.clone());
        if group.response_time_seconds.is_none() {
            group.response_time_seconds = group.first_response_seconds();
        }
        // The snapshot is kept; acknowledged groups simply stop walking it
        self.scheduler.cancel(&mut group);

        self.repository.update(&mut group).await?;
        self.audit.append(
            AlertGroupLogRecord::new(id.clone(), AlertGroupLogType::Ack).with_author(by),
        );
        Ok(TransitionOutcome::Applied)
    }

    /// Return an acknowledged alert group to firing and resume escalation
    /// from the current cursor (not from the top).
    pub async fn unacknowledge(&self, id: &AlertGroupId, by: UserId) -> Result<TransitionOutcome> {
        let lock = self.locks.lock_handle(id);
        let _guard = lock.lock().await;

        let mut group = self.load(id).await?;
        if group.state != AlertGroupState::Acknowledged {
            tracing::debug!(alert_group_id = %id, state = %group.state, "Unacknowledge is a no-op");
            return Ok(TransitionOutcome::NoChange);
        }

        group.state = AlertGroupState::Firing;
        group.acknowledged_at = None;
        group.acknowledged_by = None;
        let tasks = self.resume_escalation(&mut group);

        self.repository.update(&mut group).await?;
        self.audit.append(
            AlertGroupLogRecord::new(id.clone(), AlertGroupLogType::UnAck).with_author(by),
        );
        for task in tasks {
            self.scheduler.submit(task).await;
        }
        Ok(TransitionOutcome::Applied)
    }

    /// Resolve an alert group. `by` is None for automatic resolution.
    pub async fn resolve(&self, id: &AlertGroupId, by: Option<UserId>) -> Result<TransitionOutcome> {
        let lock = self.locks.lock_handle(id);
        let _guard = lock.lock().await;

        let mut group = self.load(id).await?;
        if group.state == AlertGroupState::Resolved {
            tracing::debug!(alert_group_id = %id, "Resolve is a no-op");
            return Ok(TransitionOutcome::NoChange);
        }

        let now = Utc::now();
        if group.state == AlertGroupState::Silenced {
            group.silenced_at = None;
            group.silenced_until = None;
            group.silenced_by = None;
            self.audit.append(
                AlertGroupLogRecord::new(id.clone(), AlertGroupLogType::UnSilence)
                    .with_reason("resolve"),
            );
        }

        group.state = AlertGroupState::Resolved;
        group.resolved_at = Some(now);
        group.resolved_by = by.clone();
        if group.response_time_seconds.is_none() {
            group.response_time_seconds = group.first_response_seconds();
        }
        // The snapshot stays readable for audit but is never advanced again
        self.scheduler.cancel(&mut group);

        self.repository.update(&mut group).await?;
        let mut record = AlertGroupLogRecord::new(id.clone(), AlertGroupLogType::Resolved);
        match by {
            Some(user) => record = record.with_author(user),
            None => record = record.with_reason("resolved automatically"),
        }
        self.audit.append(record);
        Ok(TransitionOutcome::Applied)
    }

    /// Silence a firing or acknowledged alert group for `delay_seconds`.
    /// Zero is the "silence forever" sentinel: no automatic resume.
    pub async fn silence(
        &self,
        id: &AlertGroupId,
        by: UserId,
        delay_seconds: u64,
    ) -> Result<TransitionOutcome> {
        let lock = self.locks.lock_handle(id);
        let _guard = lock.lock().await;

        let mut group = self.load(id).await?;
        if !matches!(
            group.state,
            AlertGroupState::Firing | AlertGroupState::Acknowledged
        ) {
            tracing::debug!(alert_group_id = %id, state = %group.state, "Silence is a no-op");
            return Ok(TransitionOutcome::NoChange);
        }

        let now = Utc::now();
        if group.state == AlertGroupState::Acknowledged {
            group.acknowledged_at = None;
            group.acknowledged_by = None;
            self.audit.append(
                AlertGroupLogRecord::new(id.clone(), AlertGroupLogType::UnAck)
                    .with_author(by.clone())
                    .with_reason("silence"),
            );
        }

        let mut tasks = Vec::new();
        if let Some(snapshot) = group.escalation_snapshot.as_mut() {
            snapshot.pause();
            if delay_seconds > 0 {
                snapshot.next_step_eta = Some(
                    now + Duration::seconds(
                        (delay_seconds + self.config.start_escalation_delay_seconds) as i64,
                    ),
                );
            }
        }

        group.state = AlertGroupState::Silenced;
        group.silenced_at = Some(now);
        group.silenced_by = Some(by.clone());
        group.silenced_until = if delay_seconds > 0 {
            Some(now + Duration::seconds(delay_seconds as i64))
        } else {
            None
        };
        if group.response_time_seconds.is_none() {
            group.response_time_seconds = group.first_response_seconds();
        }
        self.scheduler.cancel(&mut group);

        if delay_seconds > 0 {
            tasks.push(ScheduledTask::new(
                now + Duration::seconds(delay_seconds as i64),
                TaskKind::Unsilence {
                    alert_group_id: id.clone(),
                },
            ));
        }

        self.repository.update(&mut group).await?;
        let mut record = AlertGroupLogRecord::new(id.clone(), AlertGroupLogType::Silence)
            .with_author(by);
        if delay_seconds > 0 {
            record = record.with_silence_delay(delay_seconds);
        }
        self.audit.append(record);
        for task in tasks {
            self.scheduler.submit(task).await;
        }
        Ok(TransitionOutcome::Applied)
    }

    /// Lift a silence. `by` is None when the silence timer expired. The
    /// group returns to firing and escalation restarts from the top.
    pub async fn unsilence(
        &self,
        id: &AlertGroupId,
        by: Option<UserId>,
    ) -> Result<TransitionOutcome> {
        let lock = self.locks.lock_handle(id);
        let _guard = lock.lock().await;

        let mut group = self.load(id).await?;
        if group.state != AlertGroupState::Silenced {
            tracing::debug!(alert_group_id = %id, state = %group.state, "Unsilence is a no-op");
            return Ok(TransitionOutcome::NoChange);
        }

        group.state = AlertGroupState::Firing;
        group.silenced_at = None;
        group.silenced_until = None;
        group.silenced_by = None;
        let tasks = self.start_escalation(&mut group);

        self.repository.update(&mut group).await?;
        let mut record = AlertGroupLogRecord::new(id.clone(), AlertGroupLogType::UnSilence);
        match by {
            Some(user) => record = record.with_author(user),
            None => record = record.with_reason("silence timeout expired"),
        }
        self.audit.append(record);
        for task in tasks {
            self.scheduler.submit(task).await;
        }
        Ok(TransitionOutcome::Applied)
    }

    /// Attach a new alert to the group. Always allowed. A resolved group
    /// un-resolves exactly once (racing attaches serialize on the group
    /// lock); otherwise the alert is absorbed without restarting the chain.
    pub async fn attach_alert(
        &self,
        id: &AlertGroupId,
        payload: serde_json::Value,
    ) -> Result<TransitionOutcome> {
        let lock = self.locks.lock_handle(id);
        let _guard = lock.lock().await;

        let mut group = self.load(id).await?;
        group.alerts.push(Alert::new(id.clone(), payload));

        let mut tasks = Vec::new();
        let mut outcome = TransitionOutcome::NoChange;

        if group.state == AlertGroupState::Resolved && !group.is_wiped() {
            group.state = AlertGroupState::Firing;
            group.resolved_at = None;
            group.resolved_by = None;
            group.restarted_at = Some(Utc::now());
            outcome = TransitionOutcome::Applied;

            self.audit.append(
                AlertGroupLogRecord::new(id.clone(), AlertGroupLogType::UnResolved)
                    .with_reason("new alert received"),
            );

            // Resume the existing snapshot if one survived, rebuild otherwise
            tasks = if group.escalation_snapshot.is_some() {
                self.resume_escalation(&mut group)
            } else {
                self.start_escalation(&mut group)
            };
        } else if group.state == AlertGroupState::Firing {
            // A paused walk (alerts-in-window step) resumes from its
            // preserved ETA so the step can re-check the volume condition.
            let paused = group
                .escalation_snapshot
                .as_ref()
                .is_some_and(|s| s.pause_escalation);
            if paused {
                let now = Utc::now();
                let mut run_at = now + Duration::seconds(self.config.next_step_delay_seconds as i64);
                let mut expected_order = 0;
                if let Some(snapshot) = group.escalation_snapshot.as_mut() {
                    snapshot.resume();
                    if let Some(eta) = snapshot.next_step_eta {
                        if eta > run_at {
                            run_at = eta;
                        }
                    }
                    snapshot.next_step_eta = Some(run_at);
                    expected_order = snapshot.next_active_order();
                }
                let escalation_id = Uuid::new_v4();
                group.active_escalation_id = Some(escalation_id);
                group.is_escalation_finished = false;
                tasks.push(ScheduledTask::new(
                    run_at,
                    TaskKind::EscalationStep {
                        alert_group_id: id.clone(),
                        escalation_id,
                        expected_order,
                    },
                ));
            }
        }

        self.repository.update(&mut group).await?;
        for task in tasks {
            self.scheduler.submit(task).await;
        }
        Ok(outcome)
    }

    /// Wipe an alert group: resolve it, clear the snapshot, and stop all
    /// scheduling permanently.
    pub async fn wipe(&self, id: &AlertGroupId, by: UserId) -> Result<TransitionOutcome> {
        let lock = self.locks.lock_handle(id);
        let _guard = lock.lock().await;

        let mut group = self.load(id).await?;
        if group.is_wiped() {
            return Ok(TransitionOutcome::NoChange);
        }

        let now = Utc::now();
        if group.state != AlertGroupState::Resolved {
            group.state = AlertGroupState::Resolved;
            group.resolved_at = Some(now);
        }
        group.silenced_at = None;
        group.silenced_until = None;
        group.silenced_by = None;
        group.wiped_at = Some(now);
        group.wiped_by = Some(by.clone());
        group.escalation_snapshot = None;
        group.estimated_escalation_finish_at = None;
        if group.response_time_seconds.is_none() {
            group.response_time_seconds = group.first_response_seconds();
        }
        self.scheduler.cancel(&mut group);

        self.repository.update(&mut group).await?;
        self.audit.append(
            AlertGroupLogRecord::new(id.clone(), AlertGroupLogType::Wiped).with_author(by),
        );
        Ok(TransitionOutcome::Applied)
    }

    /// Build a fresh snapshot from live routing and arm the first step.
    ///
    /// Mutates the group in place and returns the tasks to submit once the
    /// group has been persisted. Missing routing or chain is non-fatal: the
    /// group stays firing with manual actions only.
    pub fn start_escalation(&self, group: &mut AlertGroup) -> Vec<ScheduledTask> {
        if group.is_wiped() || group.state != AlertGroupState::Firing {
            return Vec::new();
        }

        let snapshot = group
            .channel_filter_id
            .as_deref()
            .and_then(|cf| self.routing.channel_filter(cf))
            .as_ref()
            .and_then(EscalationSnapshot::build);

        group.escalation_snapshot = snapshot;
        if group.escalation_snapshot.is_none() {
            tracing::info!(
                alert_group_id = %group.id,
                channel_filter_id = group.channel_filter_id.as_deref().unwrap_or(""),
                "No escalation chain configured; alert group will not escalate automatically"
            );
            group.active_escalation_id = None;
            group.is_escalation_finished = true;
            group.estimated_escalation_finish_at = None;
            return Vec::new();
        }

        self.arm(group)
    }

    /// Re-arm the walk from the current cursor without rebuilding the
    /// snapshot. Used by unacknowledge and un-resolve.
    pub fn resume_escalation(&self, group: &mut AlertGroup) -> Vec<ScheduledTask> {
        if group.is_wiped() || group.state != AlertGroupState::Firing {
            return Vec::new();
        }
        match &group.escalation_snapshot {
            None => Vec::new(),
            Some(snapshot) if snapshot.pause_escalation => Vec::new(),
            Some(_) => self.arm(group),
        }
    }

    fn arm(&self, group: &mut AlertGroup) -> Vec<ScheduledTask> {
        let now = Utc::now();
        let escalation_id = Uuid::new_v4();
        group.active_escalation_id = Some(escalation_id);
        group.is_escalation_finished = false;

        let (expected_order, eta, estimate) = match &group.escalation_snapshot {
            Some(snapshot) => (
                snapshot.next_active_order(),
                now + Duration::seconds(self.config.start_escalation_delay_seconds as i64),
                snapshot.estimated_finish_time(now, &self.config),
            ),
            None => return Vec::new(),
        };
        group.estimated_escalation_finish_at = Some(estimate);
        if let Some(snapshot) = group.escalation_snapshot.as_mut() {
            snapshot.next_step_eta = Some(eta);
        }

        tracing::debug!(
            alert_group_id = %group.id,
            escalation_id = %escalation_id,
            expected_order,
            "Arming escalation"
        );
        vec![ScheduledTask::new(
            eta,
            TaskKind::EscalationStep {
                alert_group_id: group.id.clone(),
                escalation_id,
                expected_order,
            },
        )]
    }
}
