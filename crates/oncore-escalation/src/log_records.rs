//! Alert group audit trail.
//!
//! Every state transition and escalation step execution appends a record.
//! Records are never mutated afterwards.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use oncore_core::ids::{AlertGroupId, UserId};

/// Kind of audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertGroupLogType {
    Ack,
    UnAck,
    Resolved,
    UnResolved,
    Silence,
    UnSilence,
    Wiped,
    EscalationTriggered,
    EscalationFailed,
    EscalationFinished,
}

impl AlertGroupLogType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ack => "acknowledged",
            Self::UnAck => "unacknowledged",
            Self::Resolved => "resolved",
            Self::UnResolved => "unresolved",
            Self::Silence => "silenced",
            Self::UnSilence => "unsilenced",
            Self::Wiped => "wiped",
            Self::EscalationTriggered => "escalation triggered",
            Self::EscalationFailed => "escalation failed",
            Self::EscalationFinished => "escalation finished",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertGroupLogRecord {
    pub alert_group_id: AlertGroupId,
    pub record_type: AlertGroupLogType,
    /// Acting user, None for automatic actions
    pub author: Option<UserId>,
    pub reason: Option<String>,
    /// Escalation policy position, for escalation records
    pub escalation_policy_order: Option<usize>,
    /// Step display name, for escalation records
    pub escalation_step: Option<String>,
    /// Configured silence duration, for silence records
    pub silence_delay_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl AlertGroupLogRecord {
    pub fn new(alert_group_id: AlertGroupId, record_type: AlertGroupLogType) -> Self {
        Self {
            alert_group_id,
            record_type,
            author: None,
            reason: None,
            escalation_policy_order: None,
            escalation_step: None,
            silence_delay_seconds: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_author(mut self, author: UserId) -> Self {
        self.author = Some(author);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_policy(mut self, order: usize, step: impl Into<String>) -> Self {
        self.escalation_policy_order = Some(order);
        self.escalation_step = Some(step.into());
        self
    }

    pub fn with_silence_delay(mut self, delay_seconds: u64) -> Self {
        self.silence_delay_seconds = Some(delay_seconds);
        self
    }
}

/// Append-only audit log collaborator.
pub trait AuditLog: Send + Sync {
    /// Append a record.
    fn append(&self, record: AlertGroupLogRecord);

    /// All records for one alert group, in append order.
    fn records_for(&self, alert_group_id: &AlertGroupId) -> Vec<AlertGroupLogRecord>;
}

/// In-memory audit log.
#[derive(Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<AlertGroupLogRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, record: AlertGroupLogRecord) {
        tracing::debug!(
            alert_group_id = %record.alert_group_id,
            record_type = record.record_type.as_str(),
            reason = record.reason.as_deref().unwrap_or(""),
            "Audit record"
        );
        self.records.write().push(record);
    }

    fn records_for(&self, alert_group_id: &AlertGroupId) -> Vec<AlertGroupLogRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| &r.alert_group_id == alert_group_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_query() {
        let log = MemoryAuditLog::new();
        let group = AlertGroupId::new();
        let user = UserId::new();

        log.append(
            AlertGroupLogRecord::new(group.clone(), AlertGroupLogType::Ack)
                .with_author(user.clone()),
        );
        log.append(
            AlertGroupLogRecord::new(group.clone(), AlertGroupLogType::EscalationTriggered)
                .with_policy(0, "notify users")
                .with_reason("escalation chain step"),
        );
        log.append(AlertGroupLogRecord::new(
            AlertGroupId::new(),
            AlertGroupLogType::Resolved,
        ));

        let records = log.records_for(&group);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_type, AlertGroupLogType::Ack);
        assert_eq!(records[0].author, Some(user));
        assert_eq!(records[1].escalation_policy_order, Some(0));
    }
}
