//! Escalation engine: the task handler that drives snapshot walks.
//!
//! Every delivered task re-reads the alert group and checks that the state
//! which justified scheduling it still holds; anything stale is a silent
//! no-op. Delivery is at-least-once, so a step may arrive twice or late
//! relative to a racing user action; the fencing id plus the cursor check
//! make duplicate execution harmless.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use oncore_core::ids::{AlertGroupId, UserId};
use oncore_core::queue::{ScheduledTask, TaskHandler, TaskKind};
use oncore_notify::{NotificationDispatch, UserDirectory};

use crate::alert_group::{Alert, AlertGroup, AlertGroupState};
use crate::config::EscalationConfig;
use crate::error::{Error, Result};
use crate::executor::EscalationPolicyExecutor;
use crate::log_records::{AlertGroupLogRecord, AlertGroupLogType, AuditLog};
use crate::repository::AlertGroupRepository;
use crate::scheduler::EscalationScheduler;
use crate::state_machine::{AlertGroupStateMachine, LockRegistry, TransitionOutcome};

/// Wires the state machine, executor, scheduler and notification dispatch
/// into one task handler.
pub struct EscalationEngine {
    repository: Arc<dyn AlertGroupRepository>,
    state_machine: Arc<AlertGroupStateMachine>,
    executor: Arc<EscalationPolicyExecutor>,
    scheduler: Arc<EscalationScheduler>,
    dispatch: Arc<NotificationDispatch>,
    users: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditLog>,
    locks: Arc<LockRegistry>,
    config: EscalationConfig,
}

impl EscalationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn AlertGroupRepository>,
        state_machine: Arc<AlertGroupStateMachine>,
        executor: Arc<EscalationPolicyExecutor>,
        scheduler: Arc<EscalationScheduler>,
        dispatch: Arc<NotificationDispatch>,
        users: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditLog>,
        locks: Arc<LockRegistry>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            repository,
            state_machine,
            executor,
            scheduler,
            dispatch,
            users,
            audit,
            locks,
            config,
        }
    }

    /// The state machine handling user actions for this engine.
    pub fn state_machine(&self) -> Arc<AlertGroupStateMachine> {
        self.state_machine.clone()
    }

    /// Create an alert group for a first alert and start escalation.
    ///
    /// The first step fires after a short settle delay so near-simultaneous
    /// duplicate alerts are absorbed before anyone is notified.
    pub async fn create_alert_group(
        &self,
        integration_id: impl Into<String>,
        channel_filter_id: Option<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        first_alert_payload: serde_json::Value,
    ) -> Result<AlertGroup> {
        let mut group = AlertGroup::new(integration_id, title, message);
        group.channel_filter_id = channel_filter_id;
        group
            .alerts
            .push(Alert::new(group.id.clone(), first_alert_payload));

        let tasks = self.state_machine.start_escalation(&mut group);
        self.repository.insert(&group).await?;
        tracing::info!(
            alert_group_id = %group.id,
            integration_id = %group.integration_id,
            escalating = !tasks.is_empty(),
            "Alert group created"
        );
        for task in tasks {
            self.scheduler.submit(task).await;
        }
        Ok(group)
    }

    /// Attach a new alert to an existing group (see
    /// [`AlertGroupStateMachine::attach_alert`]).
    pub async fn attach_alert(
        &self,
        id: &AlertGroupId,
        payload: serde_json::Value,
    ) -> Result<TransitionOutcome> {
        self.state_machine.attach_alert(id, payload).await
    }

    async fn run_escalation_step(
        &self,
        alert_group_id: AlertGroupId,
        escalation_id: Uuid,
        expected_order: usize,
    ) -> Result<()> {
        let lock = self.locks.lock_handle(&alert_group_id);
        let guard = lock.lock().await;

        let Some(mut group) = self.repository.get(&alert_group_id).await? else {
            tracing::warn!(alert_group_id = %alert_group_id, "Escalation step for unknown alert group");
            return Ok(());
        };

        // Staleness checks: every condition that justified scheduling this
        // step must still hold, otherwise the delivery is a silent no-op.
        if group.active_escalation_id != Some(escalation_id) {
            tracing::debug!(
                alert_group_id = %alert_group_id,
                "Stale escalation task (fence mismatch), skipping"
            );
            return Ok(());
        }
        if group.state != AlertGroupState::Firing {
            tracing::debug!(
                alert_group_id = %alert_group_id,
                state = %group.state,
                "Alert group no longer firing, skipping escalation step"
            );
            return Ok(());
        }
        let Some(mut snapshot) = group.escalation_snapshot.take() else {
            // An armed escalation without a snapshot is a broken invariant;
            // fail this invocation only.
            return Err(Error::Validation(format!(
                "alert group {} is armed but has no escalation snapshot",
                alert_group_id
            )));
        };
        if snapshot.pause_escalation {
            group.escalation_snapshot = Some(snapshot);
            tracing::debug!(alert_group_id = %alert_group_id, "Escalation paused, skipping");
            return Ok(());
        }
        if snapshot.next_active_order() != expected_order {
            tracing::debug!(
                alert_group_id = %alert_group_id,
                expected_order,
                actual = snapshot.next_active_order(),
                "Cursor moved past this step, skipping duplicate delivery"
            );
            group.escalation_snapshot = Some(snapshot);
            return Ok(());
        }

        let now = Utc::now();
        let mut tasks: Vec<ScheduledTask> = Vec::new();
        let mut resolve_after = false;

        if expected_order >= snapshot.escalation_policies_snapshots.len() {
            // Chain exhausted: escalation is complete, no terminal state
            // change is forced.
            self.audit.append(
                AlertGroupLogRecord::new(
                    alert_group_id.clone(),
                    AlertGroupLogType::EscalationFinished,
                )
                .with_reason("escalation finished"),
            );
            group.is_escalation_finished = true;
            group.active_escalation_id = None;
            group.escalation_snapshot = Some(snapshot);
        } else {
            let outcome = {
                let policy = &mut snapshot.escalation_policies_snapshots[expected_order];
                self.executor.execute(&group, policy)
            };

            snapshot.next_step_eta = Some(outcome.eta);
            if outcome.start_from_beginning {
                snapshot.last_active_escalation_policy_order = None;
            } else if outcome.pause_escalation {
                // Cursor stays put; the step re-checks when alerts arrive
                snapshot.pause();
            } else {
                snapshot.last_active_escalation_policy_order = Some(expected_order);
            }

            if outcome.stop_escalation {
                group.is_escalation_finished = true;
                group.active_escalation_id = None;
                resolve_after = true;
            } else if outcome.pause_escalation {
                group.active_escalation_id = None;
            } else {
                let next_escalation_id = Uuid::new_v4();
                group.active_escalation_id = Some(next_escalation_id);
                tasks.push(ScheduledTask::new(
                    outcome.eta,
                    TaskKind::EscalationStep {
                        alert_group_id: alert_group_id.clone(),
                        escalation_id: next_escalation_id,
                        expected_order: snapshot.next_active_order(),
                    },
                ));
            }

            for request in outcome.notifications {
                tasks.push(ScheduledTask::new(
                    now,
                    TaskKind::NotifyUser {
                        alert_group_id: alert_group_id.clone(),
                        user_id: request.user_id,
                        previous_policy_order: None,
                        important: request.important,
                    },
                ));
            }

            group.estimated_escalation_finish_at =
                Some(snapshot.estimated_finish_time(now, &self.config));
            group.escalation_snapshot = Some(snapshot);
        }

        match self.repository.update(&mut group).await {
            Ok(()) => {}
            Err(Error::VersionConflict(msg)) => {
                tracing::debug!(
                    alert_group_id = %alert_group_id,
                    conflict = %msg,
                    "Lost the update race, skipping"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        // Side effects only after the transition committed, and never while
        // holding the group lock.
        drop(guard);
        for task in tasks {
            self.scheduler.submit(task).await;
        }
        if resolve_after {
            self.state_machine.resolve(&alert_group_id, None).await?;
        }
        Ok(())
    }

    async fn run_notify_user(
        &self,
        alert_group_id: AlertGroupId,
        user_id: UserId,
        previous_policy_order: Option<u16>,
        important: bool,
    ) -> Result<()> {
        let Some(group) = self.repository.get(&alert_group_id).await? else {
            tracing::warn!(alert_group_id = %alert_group_id, "Notification task for unknown alert group");
            return Ok(());
        };

        // Notifying is only meaningful while the group is firing
        if group.state != AlertGroupState::Firing || group.is_wiped() {
            tracing::debug!(
                alert_group_id = %alert_group_id,
                user_id = %user_id,
                state = %group.state,
                "Skipping notification, alert group is not firing"
            );
            return Ok(());
        }

        let Some(user) = self.users.get_user(&user_id) else {
            tracing::warn!(user_id = %user_id, "Notification task for unknown user");
            return Ok(());
        };
        let policies = self.users.notification_policies(&user_id, important);
        let incident = group.to_incident_view();

        if let Some(outcome) = self
            .dispatch
            .notify(&user, &incident, &policies, previous_policy_order)
            .await
        {
            let run_at = Utc::now()
                + Duration::seconds(
                    (outcome.next_delay_seconds + self.config.next_step_delay_seconds) as i64,
                );
            self.scheduler
                .submit(ScheduledTask::new(
                    run_at,
                    TaskKind::NotifyUser {
                        alert_group_id,
                        user_id,
                        previous_policy_order: Some(outcome.executed_order),
                        important,
                    },
                ))
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for EscalationEngine {
    async fn handle(&self, task: ScheduledTask) {
        let task_id = task.id;
        let result = match task.kind {
            TaskKind::EscalationStep {
                alert_group_id,
                escalation_id,
                expected_order,
            } => {
                self.run_escalation_step(alert_group_id, escalation_id, expected_order)
                    .await
            }
            TaskKind::Unsilence { alert_group_id } => self
                .state_machine
                .unsilence(&alert_group_id, None)
                .await
                .map(|_| ()),
            TaskKind::NotifyUser {
                alert_group_id,
                user_id,
                previous_policy_order,
                important,
            } => {
                self.run_notify_user(alert_group_id, user_id, previous_policy_order, important)
                    .await
            }
        };

        // A failed invocation must not poison other alert groups; the
        // surrounding retry policy of the queue owns redelivery.
        if let Err(e) = result {
            tracing::error!(task_id = %task_id, error = %e, "Task execution failed");
        }
    }
}
