//! Fan-out from "notify this user" to the user's configured backend chain.
//!
//! One invocation executes exactly one policy step and reports what the
//! caller should schedule next; the walk across steps is driven by the task
//! queue, not by a long-lived call. Backend errors are caught, logged and do
//! not stop the walk.

use std::sync::Arc;

use oncore_core::incident::IncidentView;
use oncore_core::user::User;

use crate::backend::BackendRegistry;
use crate::log::{PersonalLogStore, PersonalLogType, UserNotificationPolicyLogRecord};
use crate::policy::{
    next_policy, NotificationPolicyStep, UserNotificationPolicy, DEFAULT_NOTIFICATION_BACKEND,
};

/// What the caller should do after one dispatched step.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Order of the step that was just executed
    pub executed_order: u16,
    /// Delay before the next step may run (on top of the task-step delay)
    pub next_delay_seconds: u64,
}

/// Generic per-user notification dispatcher.
pub struct NotificationDispatch {
    registry: Arc<BackendRegistry>,
    log: Arc<PersonalLogStore>,
}

impl NotificationDispatch {
    pub fn new(registry: Arc<BackendRegistry>, log: Arc<PersonalLogStore>) -> Self {
        Self { registry, log }
    }

    /// Execute one step of the user's notification chain.
    ///
    /// `previous_order` is the order of the last attempted step, `None` to
    /// start at the top. Users with zero configured steps get a single
    /// delivery through the default backend. Returns `None` when the chain
    /// is done and nothing further should be scheduled.
    pub async fn notify(
        &self,
        user: &User,
        incident: &IncidentView,
        policies: &[UserNotificationPolicy],
        previous_order: Option<u16>,
    ) -> Option<DispatchOutcome> {
        if !user.is_notification_allowed() {
            self.log.append(
                UserNotificationPolicyLogRecord::new(
                    user.id.clone(),
                    incident.alert_group_id.clone(),
                    PersonalLogType::Failed,
                )
                .with_reason("notifications are disabled for this user"),
            );
            return None;
        }

        if policies.is_empty() {
            // Single default-backend delivery; applies even to users with no
            // configured steps at all.
            if previous_order.is_none() {
                self.invoke_backend(DEFAULT_NOTIFICATION_BACKEND, user, incident, None)
                    .await;
            }
            return None;
        }

        let policy = match next_policy(policies, previous_order) {
            Some(policy) => policy,
            None => {
                self.log.append(UserNotificationPolicyLogRecord::new(
                    user.id.clone(),
                    incident.alert_group_id.clone(),
                    PersonalLogType::Finished,
                ));
                tracing::debug!(
                    user_id = %user.id,
                    alert_group_id = %incident.alert_group_id,
                    "Personal notification chain exhausted"
                );
                return None;
            }
        };

        match &policy.step {
            NotificationPolicyStep::Notify { backend_id } => {
                self.invoke_backend(backend_id, user, incident, Some(policy.order))
                    .await;
                Some(DispatchOutcome {
                    executed_order: policy.order,
                    next_delay_seconds: 0,
                })
            }
            NotificationPolicyStep::Wait { delay_seconds } => {
                self.log.append(
                    UserNotificationPolicyLogRecord::new(
                        user.id.clone(),
                        incident.alert_group_id.clone(),
                        PersonalLogType::Triggered,
                    )
                    .with_policy_order(policy.order)
                    .with_reason("wait"),
                );
                Some(DispatchOutcome {
                    executed_order: policy.order,
                    next_delay_seconds: delay_seconds.unwrap_or(0),
                })
            }
        }
    }

    async fn invoke_backend(
        &self,
        backend_id: &str,
        user: &User,
        incident: &IncidentView,
        policy_order: Option<u16>,
    ) {
        let mut record = UserNotificationPolicyLogRecord::new(
            user.id.clone(),
            incident.alert_group_id.clone(),
            PersonalLogType::Triggered,
        )
        .with_backend(backend_id);
        if let Some(order) = policy_order {
            record = record.with_policy_order(order);
        }

        match self.registry.get(backend_id).await {
            None => {
                record.record_type = PersonalLogType::Failed;
                record.reason = Some(format!("no backend configured: {}", backend_id));
                tracing::warn!(
                    user_id = %user.id,
                    backend_id,
                    "Notification backend is not registered"
                );
            }
            Some(backend) => {
                if let Err(e) = backend.notify(user, incident).await {
                    record.record_type = PersonalLogType::Failed;
                    record.reason = Some(e.to_string());
                    tracing::warn!(
                        user_id = %user.id,
                        alert_group_id = %incident.alert_group_id,
                        backend_id,
                        error = %e,
                        "Notification attempt failed"
                    );
                }
            }
        }

        self.log.append(record);
    }
}
