//! Minimal incident projection handed to notification backends.
//!
//! Backends never see the full alert group. They receive this read-only view,
//! which keeps them decoupled from the escalation state machine.

use serde::{Deserialize, Serialize};

use crate::ids::AlertGroupId;

/// Read-only projection of an alert group for notification purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentView {
    /// The alert group this incident refers to
    pub alert_group_id: AlertGroupId,
    /// Incident title
    pub title: String,
    /// Incident message/description
    pub message: String,
    /// Integration (channel) the first alert arrived through
    pub integration_id: String,
    /// Current state label ("firing", "acknowledged", ...)
    pub state: String,
}

impl IncidentView {
    /// Get a one-line summary for log output and plain-text channels.
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} - {} (integration: {})",
            self.state, self.title, self.message, self.integration_id
        )
    }
}
