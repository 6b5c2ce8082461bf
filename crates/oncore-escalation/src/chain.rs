//! Escalation chains and routing configuration.
//!
//! A `ChannelFilter` routes an integration's alerts to an `EscalationChain`,
//! the user-configured ordered template of escalation steps. Chains are
//! read-only inputs to snapshot creation; the engine never executes a live
//! chain directly.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use oncore_core::ids::UserId;

/// One escalation step kind with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationStep {
    /// Notify an explicit set of users.
    NotifyUsers { users: Vec<UserId> },
    /// Notify whoever is on call for the given schedule at execution time.
    NotifyOnCallSchedule { schedule: String },
    /// Notify every member of a user group.
    NotifyUserGroup { group: String },
    /// Wait before the next step.
    Wait,
    /// Trigger an outgoing webhook.
    TriggerWebhook { webhook: String },
    /// Resolve the alert group automatically.
    Resolve,
    /// Restart the chain from the top, a bounded number of times.
    RepeatEscalation,
    /// Continue only if more than `num_alerts` arrived within the last
    /// `window_minutes`; otherwise pause until alert volume picks up.
    NotifyIfNumAlertsInWindow { num_alerts: u64, window_minutes: u64 },
    /// Placeholder for a step the user has not finished configuring.
    NotConfigured,
}

impl EscalationStep {
    /// Short display name for logs and audit records.
    pub fn display(&self) -> &'static str {
        match self {
            Self::NotifyUsers { .. } => "notify users",
            Self::NotifyOnCallSchedule { .. } => "notify on-call schedule",
            Self::NotifyUserGroup { .. } => "notify user group",
            Self::Wait => "wait",
            Self::TriggerWebhook { .. } => "trigger webhook",
            Self::Resolve => "resolve",
            Self::RepeatEscalation => "repeat escalation",
            Self::NotifyIfNumAlertsInWindow { .. } => "continue if alert volume persists",
            Self::NotConfigured => "not configured",
        }
    }
}

/// One configured step of an escalation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Stable policy identifier
    pub id: String,
    /// Position within the chain
    pub order: usize,
    /// What the step does
    pub step: EscalationStep,
    /// Per-policy wait override, for Wait steps
    pub wait_delay_seconds: Option<u64>,
    /// Whether notify steps walk the users' important chains
    pub important: bool,
}

impl EscalationPolicy {
    pub fn new(id: impl Into<String>, order: usize, step: EscalationStep) -> Self {
        Self {
            id: id.into(),
            order,
            step,
            wait_delay_seconds: None,
            important: false,
        }
    }

    pub fn with_wait_delay(mut self, delay_seconds: u64) -> Self {
        self.wait_delay_seconds = Some(delay_seconds);
        self
    }

    pub fn important(mut self) -> Self {
        self.important = true;
        self
    }
}

/// User-configured ordered template of escalation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationChain {
    pub id: String,
    pub name: String,
    pub policies: Vec<EscalationPolicy>,
}

impl EscalationChain {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            policies: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: EscalationPolicy) -> Self {
        self.policies.push(policy);
        self
    }
}

/// Routing configuration attaching an escalation chain to an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFilter {
    pub id: String,
    pub label: String,
    /// The chain alerts matching this filter escalate through
    pub escalation_chain: Option<EscalationChain>,
    /// Messaging channel notifications should target, if any
    pub notification_channel_id: Option<String>,
}

impl ChannelFilter {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            escalation_chain: None,
            notification_channel_id: None,
        }
    }

    pub fn with_escalation_chain(mut self, chain: EscalationChain) -> Self {
        self.escalation_chain = Some(chain);
        self
    }

    pub fn with_notification_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.notification_channel_id = Some(channel_id.into());
        self
    }
}

/// Read access to live routing configuration.
pub trait RoutingProvider: Send + Sync {
    /// Look up a channel filter by id.
    fn channel_filter(&self, channel_filter_id: &str) -> Option<ChannelFilter>;
}

/// In-memory routing table.
#[derive(Default)]
pub struct MemoryRouting {
    filters: RwLock<HashMap<String, ChannelFilter>>,
}

impl MemoryRouting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a channel filter.
    pub fn register(&self, filter: ChannelFilter) {
        self.filters.write().insert(filter.id.clone(), filter);
    }

    /// Remove a channel filter. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.filters.write().remove(id).is_some()
    }
}

impl RoutingProvider for MemoryRouting {
    fn channel_filter(&self, channel_filter_id: &str) -> Option<ChannelFilter> {
        self.filters.read().get(channel_filter_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_builder() {
        let chain = EscalationChain::new("chain-1", "critical path")
            .with_policy(EscalationPolicy::new(
                "p-0",
                0,
                EscalationStep::NotifyUsers {
                    users: vec![UserId::new()],
                },
            ))
            .with_policy(EscalationPolicy::new("p-1", 1, EscalationStep::Wait).with_wait_delay(300));

        assert_eq!(chain.policies.len(), 2);
        assert_eq!(chain.policies[1].wait_delay_seconds, Some(300));
    }

    #[test]
    fn test_step_serde_names() {
        let step = EscalationStep::NotifyOnCallSchedule {
            schedule: "primary".to_string(),
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["kind"], "notify_on_call_schedule");

        let parsed: EscalationStep = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, step);
    }

    #[test]
    fn test_memory_routing() {
        let routing = MemoryRouting::new();
        routing.register(
            ChannelFilter::new("cf-1", "default")
                .with_escalation_chain(EscalationChain::new("chain-1", "default")),
        );

        assert!(routing.channel_filter("cf-1").is_some());
        assert!(routing.channel_filter("cf-2").is_none());
        assert!(routing.remove("cf-1"));
        assert!(routing.channel_filter("cf-1").is_none());
    }
}
