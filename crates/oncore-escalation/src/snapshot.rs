//! Escalation snapshots.
//!
//! When escalation (re)starts, the live chain and its routing are deep-copied
//! into a snapshot owned by the alert group. The snapshot is what actually
//! executes: later edits or deletion of the live chain never affect an
//! in-flight escalation. Only the cursor, the pause flag and the next-step
//! ETA change after creation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::{ChannelFilter, EscalationPolicy, EscalationStep};
use crate::config::EscalationConfig;

/// Grace period when checking whether a next-step ETA is still plausible.
const NEXT_STEP_ETA_GRACE_MINUTES: i64 = 5;

/// Frozen copy of the routing target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFilterSnapshot {
    pub id: String,
    pub label: String,
}

/// Frozen identity of the escalation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationChainSnapshot {
    pub id: String,
    pub name: String,
}

/// Frozen copy of one escalation policy, plus per-incident scratch state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicySnapshot {
    pub id: String,
    pub order: usize,
    pub step: EscalationStep,
    pub wait_delay_seconds: Option<u64>,
    pub important: bool,
    /// Times a repeat step has restarted the chain for this incident
    #[serde(default)]
    pub escalation_counter: u32,
    /// Set while an alerts-in-window step is holding the chain
    #[serde(default)]
    pub pause_escalation: bool,
}

impl From<&EscalationPolicy> for EscalationPolicySnapshot {
    fn from(policy: &EscalationPolicy) -> Self {
        Self {
            id: policy.id.clone(),
            order: policy.order,
            step: policy.step.clone(),
            wait_delay_seconds: policy.wait_delay_seconds,
            important: policy.important,
            escalation_counter: 0,
            pause_escalation: false,
        }
    }
}

/// Per-incident frozen copy of an escalation chain, with walk state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSnapshot {
    pub channel_filter_snapshot: ChannelFilterSnapshot,
    pub escalation_chain_snapshot: EscalationChainSnapshot,
    /// Policies in execution order; never changes after creation
    pub escalation_policies_snapshots: Vec<EscalationPolicySnapshot>,
    /// Index of the last executed policy, None before the first step
    pub last_active_escalation_policy_order: Option<usize>,
    /// While set, the scheduler must not advance the cursor
    pub pause_escalation: bool,
    /// When the next step is expected to fire
    pub next_step_eta: Option<DateTime<Utc>>,
    /// Messaging channel escalation notifications should target
    pub notification_channel_id: Option<String>,
}

impl EscalationSnapshot {
    /// Materialize a snapshot from live routing configuration.
    ///
    /// Returns None when the filter has no escalation chain; the alert group
    /// then sits in firing with manual actions only.
    pub fn build(channel_filter: &ChannelFilter) -> Option<Self> {
        let chain = channel_filter.escalation_chain.as_ref()?;

        let mut policies: Vec<&EscalationPolicy> = chain.policies.iter().collect();
        policies.sort_by_key(|p| p.order);

        Some(Self {
            channel_filter_snapshot: ChannelFilterSnapshot {
                id: channel_filter.id.clone(),
                label: channel_filter.label.clone(),
            },
            escalation_chain_snapshot: EscalationChainSnapshot {
                id: chain.id.clone(),
                name: chain.name.clone(),
            },
            escalation_policies_snapshots: policies
                .into_iter()
                .map(EscalationPolicySnapshot::from)
                .collect(),
            last_active_escalation_policy_order: None,
            pause_escalation: false,
            next_step_eta: None,
            notification_channel_id: channel_filter.notification_channel_id.clone(),
        })
    }

    /// Index of the next policy to execute.
    pub fn next_active_order(&self) -> usize {
        match self.last_active_escalation_policy_order {
            None => 0,
            Some(order) => order + 1,
        }
    }

    /// The next policy to execute, None when the chain is exhausted.
    pub fn next_active_policy(&self) -> Option<&EscalationPolicySnapshot> {
        self.escalation_policies_snapshots.get(self.next_active_order())
    }

    /// The last executed policy, if any.
    pub fn last_active_policy(&self) -> Option<&EscalationPolicySnapshot> {
        self.escalation_policies_snapshots
            .get(self.last_active_escalation_policy_order?)
    }

    /// Policies that have already been executed.
    pub fn executed_policies(&self) -> &[EscalationPolicySnapshot] {
        match self.last_active_escalation_policy_order {
            None => &[],
            Some(order) => &self.escalation_policies_snapshots[..=order],
        }
    }

    /// Hold the walk. The cursor and the next-step ETA are preserved so a
    /// later resume continues mid-chain instead of restarting.
    pub fn pause(&mut self) {
        self.pause_escalation = true;
    }

    /// Release a held walk.
    pub fn resume(&mut self) {
        self.pause_escalation = false;
    }

    /// Whether the stored ETA is still plausible. The ETA should always be
    /// in the future (modulo a small grace window) while a walk is armed; a
    /// past ETA means a step was missed or substantially delayed.
    pub fn next_step_eta_is_valid(&self, now: DateTime<Utc>) -> Option<bool> {
        let eta = self.next_step_eta?;
        Some(eta > now - Duration::minutes(NEXT_STEP_ETA_GRACE_MINUTES))
    }

    /// Estimate when the remaining chain will have finished executing.
    pub fn estimated_finish_time(&self, now: DateTime<Utc>, config: &EscalationConfig) -> DateTime<Utc> {
        let remaining: u64 = self.escalation_policies_snapshots[self.next_active_order().min(self.escalation_policies_snapshots.len())..]
            .iter()
            .map(|p| match p.step {
                EscalationStep::Wait => p
                    .wait_delay_seconds
                    .unwrap_or(config.default_wait_delay_seconds),
                _ => config.next_step_delay_seconds,
            })
            .sum();
        now + Duration::seconds(remaining as i64)
    }
}
