//! User model as the escalation core sees it.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// A user that can be notified during escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier
    pub id: UserId,
    /// Username
    pub username: String,
    /// Email address, if configured
    pub email: Option<String>,
    /// Whether the user has opted out of all notifications
    pub notifications_disabled: bool,
}

impl User {
    /// Create a new user with notifications enabled.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            email: None,
            notifications_disabled: false,
        }
    }

    /// Set the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Disable all notifications for this user.
    pub fn with_notifications_disabled(mut self) -> Self {
        self.notifications_disabled = true;
        self
    }

    /// Check whether this user may be notified at all.
    pub fn is_notification_allowed(&self) -> bool {
        !self.notifications_disabled
    }
}
