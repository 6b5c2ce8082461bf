//! Per-user notification audit trail.
//!
//! One record is written per notification attempt or chain event. Records
//! are append-only; nothing in the system mutates a record after the fact.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use oncore_core::ids::{AlertGroupId, UserId};

/// What happened at one point of a user's notification chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonalLogType {
    /// A step was triggered (backend invoked or wait started).
    Triggered,
    /// The chain was walked to the end.
    Finished,
    /// A step failed (backend error, missing backend, forbidden user).
    Failed,
}

impl PersonalLogType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Triggered => "triggered",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

/// One notification attempt/outcome record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserNotificationPolicyLogRecord {
    pub user_id: UserId,
    pub alert_group_id: AlertGroupId,
    pub record_type: PersonalLogType,
    /// Policy step order, if a concrete step was involved
    pub policy_order: Option<u16>,
    /// Backend invoked, if any
    pub backend_id: Option<String>,
    /// Human-readable cause
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserNotificationPolicyLogRecord {
    pub fn new(
        user_id: UserId,
        alert_group_id: AlertGroupId,
        record_type: PersonalLogType,
    ) -> Self {
        Self {
            user_id,
            alert_group_id,
            record_type,
            policy_order: None,
            backend_id: None,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_policy_order(mut self, order: u16) -> Self {
        self.policy_order = Some(order);
        self
    }

    pub fn with_backend(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = Some(backend_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Append-only in-memory store of personal notification records.
#[derive(Default)]
pub struct PersonalLogStore {
    records: RwLock<Vec<UserNotificationPolicyLogRecord>>,
}

impl PersonalLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn append(&self, record: UserNotificationPolicyLogRecord) {
        self.records.write().push(record);
    }

    /// All records for an alert group.
    pub fn for_alert_group(&self, id: &AlertGroupId) -> Vec<UserNotificationPolicyLogRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| &r.alert_group_id == id)
            .cloned()
            .collect()
    }

    /// All records for a user.
    pub fn for_user(&self, id: &UserId) -> Vec<UserNotificationPolicyLogRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| &r.user_id == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
