//! Alert groups: the unit of escalation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use oncore_core::ids::{AlertGroupId, AlertId, UserId};
use oncore_core::incident::IncidentView;

use crate::snapshot::EscalationSnapshot;

/// Lifecycle state of an alert group. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertGroupState {
    /// Alerting, escalation may be in progress
    #[default]
    Firing,
    /// A human has taken ownership; escalation stops
    Acknowledged,
    /// The incident is over
    Resolved,
    /// Escalation suppressed until a resume time (or forever)
    Silenced,
}

impl AlertGroupState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Firing => "firing",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Silenced => "silenced",
        }
    }
}

impl std::fmt::Display for AlertGroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One raw inbound event, attached to exactly one alert group.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub alert_group_id: AlertGroupId,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(alert_group_id: AlertGroupId, payload: serde_json::Value) -> Self {
        Self {
            id: AlertId::new(),
            alert_group_id,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Deduplicated cluster of alerts treated as one incident.
///
/// State is mutated exclusively through the state machine; the escalation
/// snapshot is mutated exclusively through this group's own escalation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertGroup {
    pub id: AlertGroupId,
    /// Integration (channel) the alerts arrive through
    pub integration_id: String,
    /// Routing config used to build escalation snapshots
    pub channel_filter_id: Option<String>,
    pub title: String,
    pub message: String,
    pub state: AlertGroupState,
    pub started_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
    pub silenced_at: Option<DateTime<Utc>>,
    /// None while silenced means "silenced forever"
    pub silenced_until: Option<DateTime<Utc>>,
    pub silenced_by: Option<UserId>,
    /// Set when a resolved group is re-fired by a new alert
    pub restarted_at: Option<DateTime<Utc>>,
    pub wiped_at: Option<DateTime<Utc>>,
    pub wiped_by: Option<UserId>,
    /// Seconds from the first alert to the first human/terminal response
    pub response_time_seconds: Option<i64>,
    /// Fencing token of the currently armed escalation, if any
    pub active_escalation_id: Option<Uuid>,
    pub is_escalation_finished: bool,
    pub escalation_snapshot: Option<EscalationSnapshot>,
    pub estimated_escalation_finish_at: Option<DateTime<Utc>>,
    /// Alerts attached to this group
    pub alerts: Vec<Alert>,
    /// Optimistic concurrency stamp, maintained by the repository
    pub version: u64,
}

impl AlertGroup {
    /// Create a new firing alert group with no alerts attached yet.
    pub fn new(
        integration_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: AlertGroupId::new(),
            integration_id: integration_id.into(),
            channel_filter_id: None,
            title: title.into(),
            message: message.into(),
            state: AlertGroupState::Firing,
            started_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            silenced_at: None,
            silenced_until: None,
            silenced_by: None,
            restarted_at: None,
            wiped_at: None,
            wiped_by: None,
            response_time_seconds: None,
            active_escalation_id: None,
            is_escalation_finished: true,
            escalation_snapshot: None,
            estimated_escalation_finish_at: None,
            alerts: Vec::new(),
            version: 0,
        }
    }

    pub fn with_channel_filter(mut self, channel_filter_id: impl Into<String>) -> Self {
        self.channel_filter_id = Some(channel_filter_id.into());
        self
    }

    pub fn is_firing(&self) -> bool {
        self.state == AlertGroupState::Firing
    }

    pub fn is_acknowledged(&self) -> bool {
        self.state == AlertGroupState::Acknowledged
    }

    pub fn is_resolved(&self) -> bool {
        self.state == AlertGroupState::Resolved
    }

    pub fn is_silenced(&self) -> bool {
        self.state == AlertGroupState::Silenced
    }

    pub fn is_wiped(&self) -> bool {
        self.wiped_at.is_some()
    }

    /// Silenced with no automatic resume time.
    pub fn is_silenced_forever(&self) -> bool {
        self.is_silenced() && self.silenced_until.is_none()
    }

    /// Number of alerts within `window_minutes` of the most recent alert.
    pub fn alerts_in_window(&self, window_minutes: u64) -> usize {
        let Some(last) = self.alerts.last() else {
            return 0;
        };
        let window_start = last.created_at - Duration::minutes(window_minutes as i64);
        self.alerts
            .iter()
            .filter(|a| a.created_at >= window_start)
            .count()
    }

    /// Seconds from the first alert to the earliest response action.
    /// None while nothing has happened yet.
    pub fn first_response_seconds(&self) -> Option<i64> {
        let timestamps = [
            self.acknowledged_at,
            self.resolved_at,
            self.silenced_at,
            self.wiped_at,
        ];
        let min_timestamp = timestamps.iter().flatten().min()?;
        Some((*min_timestamp - self.started_at).num_seconds())
    }

    /// Projection handed to notification backends.
    pub fn to_incident_view(&self) -> IncidentView {
        IncidentView {
            alert_group_id: self.id.clone(),
            title: self.title.clone(),
            message: self.message.clone(),
            integration_id: self.integration_id.clone(),
            state: self.state.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_group_is_firing() {
        let group = AlertGroup::new("grafana", "High CPU", "CPU above 95%");
        assert!(group.is_firing());
        assert!(group.escalation_snapshot.is_none());
        assert!(group.is_escalation_finished);
        assert_eq!(group.version, 0);
    }

    #[test]
    fn test_alerts_in_window() {
        let mut group = AlertGroup::new("grafana", "t", "m");
        assert_eq!(group.alerts_in_window(10), 0);

        let mut old = Alert::new(group.id.clone(), serde_json::json!({}));
        old.created_at = Utc::now() - Duration::minutes(30);
        group.alerts.push(old);
        group
            .alerts
            .push(Alert::new(group.id.clone(), serde_json::json!({})));
        group
            .alerts
            .push(Alert::new(group.id.clone(), serde_json::json!({})));

        assert_eq!(group.alerts_in_window(10), 2);
        assert_eq!(group.alerts_in_window(60), 3);
    }

    #[test]
    fn test_first_response_seconds() {
        let mut group = AlertGroup::new("grafana", "t", "m");
        assert!(group.first_response_seconds().is_none());

        group.acknowledged_at = Some(group.started_at + Duration::seconds(90));
        group.resolved_at = Some(group.started_at + Duration::seconds(600));
        assert_eq!(group.first_response_seconds(), Some(90));
    }

    #[test]
    fn test_incident_view() {
        let group = AlertGroup::new("grafana", "High CPU", "CPU above 95%");
        let view = group.to_incident_view();
        assert_eq!(view.alert_group_id, group.id);
        assert_eq!(view.state, "firing");
    }

    #[test]
    fn test_state_serde_labels() {
        let json = serde_json::to_value(AlertGroupState::Acknowledged).unwrap();
        assert_eq!(json, "acknowledged");
    }
}
