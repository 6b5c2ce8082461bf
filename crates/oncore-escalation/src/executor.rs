//! Escalation policy step executor.
//!
//! Executes exactly one snapshot step against the current alert group state
//! and reports what should happen next. The executor performs no scheduling
//! and no storage writes of its own; the engine applies the outcome under
//! the group's lock. Target resolution failures (empty schedule, empty
//! group) are non-fatal: the step completes with zero effect and a failure
//! audit record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};

use oncore_core::ids::{AlertGroupId, UserId};

use crate::alert_group::AlertGroup;
use crate::chain::EscalationStep;
use crate::config::EscalationConfig;
use crate::log_records::{AlertGroupLogRecord, AlertGroupLogType, AuditLog};
use crate::snapshot::EscalationPolicySnapshot;

/// A user the engine should start a personal notification walk for.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub user_id: UserId,
    pub important: bool,
}

/// Result of executing one escalation policy step.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// When the next step should fire
    pub eta: DateTime<Utc>,
    /// Stop the walk and resolve the alert group
    pub stop_escalation: bool,
    /// Reset the cursor to the top of the chain
    pub start_from_beginning: bool,
    /// Hold the walk without advancing the cursor
    pub pause_escalation: bool,
    /// Personal notification walks to start
    pub notifications: Vec<NotificationRequest>,
}

/// On-call schedule and user group resolution collaborator.
pub trait OnCallResolver: Send + Sync {
    /// Users on call for the schedule at the given instant.
    fn on_call_users(&self, schedule: &str, at: DateTime<Utc>) -> Vec<UserId>;

    /// Members of a user group.
    fn group_members(&self, group: &str) -> Vec<UserId>;
}

/// Static schedule/group table, useful for tests and simple deployments.
#[derive(Default)]
pub struct StaticOnCallResolver {
    schedules: RwLock<HashMap<String, Vec<UserId>>>,
    groups: RwLock<HashMap<String, Vec<UserId>>>,
}

impl StaticOnCallResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_schedule(&self, schedule: impl Into<String>, users: Vec<UserId>) {
        self.schedules.write().insert(schedule.into(), users);
    }

    pub fn set_group(&self, group: impl Into<String>, users: Vec<UserId>) {
        self.groups.write().insert(group.into(), users);
    }
}

impl OnCallResolver for StaticOnCallResolver {
    fn on_call_users(&self, schedule: &str, _at: DateTime<Utc>) -> Vec<UserId> {
        self.schedules
            .read()
            .get(schedule)
            .cloned()
            .unwrap_or_default()
    }

    fn group_members(&self, group: &str) -> Vec<UserId> {
        self.groups.read().get(group).cloned().unwrap_or_default()
    }
}

/// Outgoing webhook collaborator. Fire-and-forget: implementations must not
/// block the caller on delivery.
pub trait WebhookTrigger: Send + Sync {
    fn trigger(&self, webhook: &str, alert_group_id: AlertGroupId, escalation_policy_id: &str);
}

/// Records triggered webhooks, for tests.
#[derive(Default)]
pub struct MemoryWebhookTrigger {
    triggered: Mutex<Vec<(String, AlertGroupId)>>,
}

impl MemoryWebhookTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggered(&self) -> Vec<(String, AlertGroupId)> {
        self.triggered.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.triggered.lock().len()
    }
}

impl WebhookTrigger for MemoryWebhookTrigger {
    fn trigger(&self, webhook: &str, alert_group_id: AlertGroupId, _escalation_policy_id: &str) {
        self.triggered
            .lock()
            .push((webhook.to_string(), alert_group_id));
    }
}

/// Executes single escalation policy steps.
pub struct EscalationPolicyExecutor {
    config: EscalationConfig,
    on_call: Arc<dyn OnCallResolver>,
    webhooks: Arc<dyn WebhookTrigger>,
    audit: Arc<dyn AuditLog>,
}

impl EscalationPolicyExecutor {
    pub fn new(
        config: EscalationConfig,
        on_call: Arc<dyn OnCallResolver>,
        webhooks: Arc<dyn WebhookTrigger>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            config,
            on_call,
            webhooks,
            audit,
        }
    }

    /// Execute one policy step for an alert group.
    ///
    /// `policy` is the snapshot entry at the current cursor position; its
    /// scratch fields (repeat counter, pause flag) may be updated.
    pub fn execute(
        &self,
        alert_group: &AlertGroup,
        policy: &mut EscalationPolicySnapshot,
    ) -> ExecutionOutcome {
        let now = Utc::now();
        let mut outcome = ExecutionOutcome {
            eta: now + Duration::seconds(self.config.next_step_delay_seconds as i64),
            stop_escalation: false,
            start_from_beginning: false,
            pause_escalation: false,
            notifications: Vec::new(),
        };

        tracing::debug!(
            alert_group_id = %alert_group.id,
            order = policy.order,
            step = policy.step.display(),
            "Executing escalation step"
        );

        let step = policy.step.clone();
        match step {
            EscalationStep::NotifyUsers { users } => {
                self.notify_targets(alert_group, policy, users, "escalation chain step", &mut outcome);
            }
            EscalationStep::NotifyOnCallSchedule { schedule } => {
                let users = self.on_call.on_call_users(&schedule, now);
                if users.is_empty() {
                    self.log_failed(
                        alert_group,
                        policy,
                        format!("nobody is on call for schedule {}", schedule),
                    );
                } else {
                    let reason = format!("user is on call for schedule {}", schedule);
                    self.notify_targets(alert_group, policy, users, &reason, &mut outcome);
                }
            }
            EscalationStep::NotifyUserGroup { group } => {
                let users = self.on_call.group_members(&group);
                if users.is_empty() {
                    self.log_failed(
                        alert_group,
                        policy,
                        format!("user group {} has no members", group),
                    );
                } else {
                    let reason = format!("user is a member of group {}", group);
                    self.notify_targets(alert_group, policy, users, &reason, &mut outcome);
                }
            }
            EscalationStep::Wait => {
                let delay = policy
                    .wait_delay_seconds
                    .unwrap_or(self.config.default_wait_delay_seconds);
                outcome.eta = now + Duration::seconds(delay as i64);
                self.log_triggered(alert_group, policy, "wait");
            }
            EscalationStep::TriggerWebhook { webhook } => {
                self.webhooks
                    .trigger(&webhook, alert_group.id.clone(), &policy.id);
                self.log_triggered(alert_group, policy, "outgoing webhook");
            }
            EscalationStep::Resolve => {
                self.log_triggered(alert_group, policy, "final resolve");
                outcome.stop_escalation = true;
            }
            EscalationStep::RepeatEscalation => {
                if policy.escalation_counter < self.config.max_escalation_repeats {
                    policy.escalation_counter += 1;
                    self.log_triggered(alert_group, policy, "repeat escalation");
                    outcome.start_from_beginning = true;
                }
            }
            EscalationStep::NotifyIfNumAlertsInWindow {
                num_alerts,
                window_minutes,
            } => {
                // Only log when the hold starts, not on every re-check
                if !policy.pause_escalation {
                    self.log_triggered(
                        alert_group,
                        policy,
                        "continue escalation if alert volume persists",
                    );
                }
                let count = alert_group.alerts_in_window(window_minutes) as u64;
                if count <= num_alerts {
                    policy.pause_escalation = true;
                    outcome.pause_escalation = true;
                } else {
                    policy.pause_escalation = false;
                }
            }
            EscalationStep::NotConfigured => {
                self.log_failed(alert_group, policy, "escalation step is not configured");
            }
        }

        outcome
    }

    fn notify_targets(
        &self,
        alert_group: &AlertGroup,
        policy: &EscalationPolicySnapshot,
        users: Vec<UserId>,
        reason: &str,
        outcome: &mut ExecutionOutcome,
    ) {
        if users.is_empty() {
            self.log_failed(alert_group, policy, "no recipients configured");
            return;
        }

        self.log_triggered(alert_group, policy, reason);
        for user_id in users {
            self.audit.append(
                AlertGroupLogRecord::new(
                    alert_group.id.clone(),
                    AlertGroupLogType::EscalationTriggered,
                )
                .with_author(user_id.clone())
                .with_policy(policy.order, policy.step.display())
                .with_reason(reason),
            );
            outcome.notifications.push(NotificationRequest {
                user_id,
                important: policy.important,
            });
        }
    }

    fn log_triggered(
        &self,
        alert_group: &AlertGroup,
        policy: &EscalationPolicySnapshot,
        reason: &str,
    ) {
        self.audit.append(
            AlertGroupLogRecord::new(
                alert_group.id.clone(),
                AlertGroupLogType::EscalationTriggered,
            )
            .with_policy(policy.order, policy.step.display())
            .with_reason(reason),
        );
    }

    fn log_failed(
        &self,
        alert_group: &AlertGroup,
        policy: &EscalationPolicySnapshot,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        tracing::warn!(
            alert_group_id = %alert_group.id,
            order = policy.order,
            step = policy.step.display(),
            reason = %reason,
            "Escalation step failed"
        );
        self.audit.append(
            AlertGroupLogRecord::new(alert_group.id.clone(), AlertGroupLogType::EscalationFailed)
                .with_policy(policy.order, policy.step.display())
                .with_reason(reason),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_group::Alert;
    use crate::chain::EscalationPolicy;
    use crate::log_records::MemoryAuditLog;

    struct Fixture {
        executor: EscalationPolicyExecutor,
        on_call: Arc<StaticOnCallResolver>,
        webhooks: Arc<MemoryWebhookTrigger>,
        audit: Arc<MemoryAuditLog>,
    }

    fn fixture() -> Fixture {
        let on_call = Arc::new(StaticOnCallResolver::new());
        let webhooks = Arc::new(MemoryWebhookTrigger::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let executor = EscalationPolicyExecutor::new(
            EscalationConfig::default(),
            on_call.clone(),
            webhooks.clone(),
            audit.clone(),
        );
        Fixture {
            executor,
            on_call,
            webhooks,
            audit,
        }
    }

    fn policy(step: EscalationStep) -> EscalationPolicySnapshot {
        EscalationPolicySnapshot::from(&EscalationPolicy::new("p-0", 0, step))
    }

    fn group() -> AlertGroup {
        AlertGroup::new("grafana", "High CPU", "CPU above 95%")
    }

    #[test]
    fn test_notify_users_step() {
        let f = fixture();
        let user = UserId::new();
        let mut p = policy(EscalationStep::NotifyUsers {
            users: vec![user.clone()],
        });

        let outcome = f.executor.execute(&group(), &mut p);
        assert_eq!(
            outcome.notifications,
            vec![NotificationRequest {
                user_id: user,
                important: false
            }]
        );
        assert!(!outcome.stop_escalation);
    }

    #[test]
    fn test_notify_users_empty_is_non_fatal() {
        let f = fixture();
        let g = group();
        let mut p = policy(EscalationStep::NotifyUsers { users: vec![] });

        let outcome = f.executor.execute(&g, &mut p);
        assert!(outcome.notifications.is_empty());
        let records = f.audit.records_for(&g.id);
        assert_eq!(records[0].record_type, AlertGroupLogType::EscalationFailed);
    }

    #[test]
    fn test_schedule_resolution_at_execution_time() {
        let f = fixture();
        let user = UserId::new();
        f.on_call.set_schedule("primary", vec![user.clone()]);

        let mut p = policy(EscalationStep::NotifyOnCallSchedule {
            schedule: "primary".to_string(),
        });
        let outcome = f.executor.execute(&group(), &mut p);
        assert_eq!(outcome.notifications[0].user_id, user);
    }

    #[test]
    fn test_empty_schedule_is_non_fatal() {
        let f = fixture();
        let g = group();
        let mut p = policy(EscalationStep::NotifyOnCallSchedule {
            schedule: "nobody".to_string(),
        });

        let outcome = f.executor.execute(&g, &mut p);
        assert!(outcome.notifications.is_empty());
        assert_eq!(
            f.audit.records_for(&g.id)[0].record_type,
            AlertGroupLogType::EscalationFailed
        );
    }

    #[test]
    fn test_important_flag_propagates() {
        let f = fixture();
        let user = UserId::new();
        let mut p = EscalationPolicySnapshot::from(
            &EscalationPolicy::new(
                "p-0",
                0,
                EscalationStep::NotifyUsers {
                    users: vec![user],
                },
            )
            .important(),
        );

        let outcome = f.executor.execute(&group(), &mut p);
        assert!(outcome.notifications[0].important);
    }

    #[test]
    fn test_wait_step_uses_configured_delay() {
        let f = fixture();
        let mut p = EscalationPolicySnapshot::from(
            &EscalationPolicy::new("p-0", 0, EscalationStep::Wait).with_wait_delay(120),
        );

        let before = Utc::now();
        let outcome = f.executor.execute(&group(), &mut p);
        let delay = (outcome.eta - before).num_seconds();
        assert!((119..=121).contains(&delay));
        assert!(outcome.notifications.is_empty());
    }

    #[test]
    fn test_wait_step_defaults_to_five_minutes() {
        let f = fixture();
        let mut p = policy(EscalationStep::Wait);

        let before = Utc::now();
        let outcome = f.executor.execute(&group(), &mut p);
        let delay = (outcome.eta - before).num_seconds();
        assert!((299..=301).contains(&delay));
    }

    #[test]
    fn test_default_eta_is_next_step_delay() {
        let f = fixture();
        let user = UserId::new();
        let mut p = policy(EscalationStep::NotifyUsers { users: vec![user] });

        let before = Utc::now();
        let outcome = f.executor.execute(&group(), &mut p);
        let delay = (outcome.eta - before).num_seconds();
        assert!((4..=6).contains(&delay));
    }

    #[test]
    fn test_webhook_step_fires_and_forgets() {
        let f = fixture();
        let g = group();
        let mut p = policy(EscalationStep::TriggerWebhook {
            webhook: "wh-1".to_string(),
        });

        f.executor.execute(&g, &mut p);
        assert_eq!(f.webhooks.triggered(), vec![("wh-1".to_string(), g.id)]);
    }

    #[test]
    fn test_resolve_step_stops_escalation() {
        let f = fixture();
        let mut p = policy(EscalationStep::Resolve);
        let outcome = f.executor.execute(&group(), &mut p);
        assert!(outcome.stop_escalation);
    }

    #[test]
    fn test_repeat_step_is_bounded() {
        let f = fixture();
        let mut p = policy(EscalationStep::RepeatEscalation);

        for i in 1..=5 {
            let outcome = f.executor.execute(&group(), &mut p);
            assert!(outcome.start_from_beginning);
            assert_eq!(p.escalation_counter, i);
        }

        // Sixth execution no longer restarts
        let outcome = f.executor.execute(&group(), &mut p);
        assert!(!outcome.start_from_beginning);
        assert_eq!(p.escalation_counter, 5);
    }

    #[test]
    fn test_alerts_in_window_pauses_on_low_volume() {
        let f = fixture();
        let mut g = group();
        g.alerts.push(Alert::new(g.id.clone(), serde_json::json!({})));

        let mut p = policy(EscalationStep::NotifyIfNumAlertsInWindow {
            num_alerts: 2,
            window_minutes: 10,
        });

        let outcome = f.executor.execute(&g, &mut p);
        assert!(outcome.pause_escalation);
        assert!(p.pause_escalation);

        // More alerts arrive; the re-check releases the hold
        for _ in 0..3 {
            g.alerts.push(Alert::new(g.id.clone(), serde_json::json!({})));
        }
        let outcome = f.executor.execute(&g, &mut p);
        assert!(!outcome.pause_escalation);
        assert!(!p.pause_escalation);
    }

    #[test]
    fn test_not_configured_step() {
        let f = fixture();
        let g = group();
        let mut p = policy(EscalationStep::NotConfigured);

        let outcome = f.executor.execute(&g, &mut p);
        assert!(!outcome.stop_escalation);
        assert_eq!(
            f.audit.records_for(&g.id)[0].record_type,
            AlertGroupLogType::EscalationFailed
        );
    }
}
