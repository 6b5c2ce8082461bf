//! Per-user notification policies.
//!
//! A user's notification chain is an ordered list of steps, independent of
//! any escalation chain: notify through a backend, or wait before the next
//! step. Policies come in a default and an "important" variant; escalation
//! steps flagged important walk the important list.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use oncore_core::ids::UserId;
use oncore_core::user::User;

/// Backend used when a user has no notification policies configured.
pub const DEFAULT_NOTIFICATION_BACKEND: &str = "email";

/// One step of a user's notification chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum NotificationPolicyStep {
    /// Notify the user through the given backend.
    Notify { backend_id: String },
    /// Wait before the next step.
    Wait { delay_seconds: Option<u64> },
}

/// A single ordered entry in a user's notification chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNotificationPolicy {
    /// The user this policy belongs to
    pub user_id: UserId,
    /// Position in the chain
    pub order: u16,
    /// What this step does
    pub step: NotificationPolicyStep,
    /// Whether this entry belongs to the important chain
    pub important: bool,
}

impl UserNotificationPolicy {
    /// Create a notify step.
    pub fn notify(user_id: UserId, order: u16, backend_id: impl Into<String>) -> Self {
        Self {
            user_id,
            order,
            step: NotificationPolicyStep::Notify {
                backend_id: backend_id.into(),
            },
            important: false,
        }
    }

    /// Create a wait step.
    pub fn wait(user_id: UserId, order: u16, delay_seconds: u64) -> Self {
        Self {
            user_id,
            order,
            step: NotificationPolicyStep::Wait {
                delay_seconds: Some(delay_seconds),
            },
            important: false,
        }
    }

    /// Mark this policy as part of the important chain.
    pub fn important(mut self) -> Self {
        self.important = true;
        self
    }

    /// Default chain for users without explicit configuration:
    /// notify by email, wait 15 minutes, notify by phone call.
    pub fn default_policies(user_id: UserId) -> Vec<Self> {
        vec![
            Self::notify(user_id.clone(), 0, DEFAULT_NOTIFICATION_BACKEND),
            Self::wait(user_id.clone(), 1, 15 * 60),
            Self::notify(user_id, 2, "phone_call"),
        ]
    }

    /// Default important chain: a single immediate phone call.
    pub fn default_important_policies(user_id: UserId) -> Vec<Self> {
        vec![Self::notify(user_id, 0, "phone_call").important()]
    }
}

/// Find the step to execute after `previous_order`, or the first step when
/// `previous_order` is `None`. Assumes nothing about ordering of the slice.
pub fn next_policy(
    policies: &[UserNotificationPolicy],
    previous_order: Option<u16>,
) -> Option<&UserNotificationPolicy> {
    policies
        .iter()
        .filter(|p| match previous_order {
            None => true,
            Some(prev) => p.order > prev,
        })
        .min_by_key(|p| p.order)
}

/// Read-only access to users and their notification chains.
pub trait UserDirectory: Send + Sync {
    /// Look up a user.
    fn get_user(&self, id: &UserId) -> Option<User>;

    /// The user's ordered notification policies for the given importance.
    fn notification_policies(&self, id: &UserId, important: bool) -> Vec<UserNotificationPolicy>;
}

/// In-memory user directory.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, User>>,
    policies: RwLock<HashMap<(UserId, bool), Vec<UserNotificationPolicy>>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub fn register_user(&self, user: User) {
        self.users.write().insert(user.id.clone(), user);
    }

    /// Set a user's notification chain for the given importance.
    pub fn set_policies(
        &self,
        user_id: UserId,
        important: bool,
        policies: Vec<UserNotificationPolicy>,
    ) {
        self.policies.write().insert((user_id, important), policies);
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn get_user(&self, id: &UserId) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    fn notification_policies(&self, id: &UserId, important: bool) -> Vec<UserNotificationPolicy> {
        self.policies
            .read()
            .get(&(id.clone(), important))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies() {
        let user_id = UserId::new();
        let policies = UserNotificationPolicy::default_policies(user_id.clone());

        assert_eq!(policies.len(), 3);
        assert_eq!(
            policies[0].step,
            NotificationPolicyStep::Notify {
                backend_id: DEFAULT_NOTIFICATION_BACKEND.to_string()
            }
        );
        assert!(matches!(
            policies[1].step,
            NotificationPolicyStep::Wait {
                delay_seconds: Some(900)
            }
        ));
        assert!(policies.iter().all(|p| !p.important));
    }

    #[test]
    fn test_default_important_policies() {
        let policies = UserNotificationPolicy::default_important_policies(UserId::new());
        assert_eq!(policies.len(), 1);
        assert!(policies[0].important);
    }

    #[test]
    fn test_next_policy() {
        let user_id = UserId::new();
        let policies = UserNotificationPolicy::default_policies(user_id);

        let first = next_policy(&policies, None).unwrap();
        assert_eq!(first.order, 0);

        let second = next_policy(&policies, Some(0)).unwrap();
        assert_eq!(second.order, 1);

        assert!(next_policy(&policies, Some(2)).is_none());
    }

    #[test]
    fn test_memory_directory() {
        let directory = MemoryUserDirectory::new();
        let user = User::new("alice");
        let user_id = user.id.clone();
        directory.register_user(user);

        assert!(directory.get_user(&user_id).is_some());
        assert!(directory.notification_policies(&user_id, false).is_empty());

        directory.set_policies(
            user_id.clone(),
            false,
            UserNotificationPolicy::default_policies(user_id.clone()),
        );
        assert_eq!(directory.notification_policies(&user_id, false).len(), 3);
        assert!(directory.notification_policies(&user_id, true).is_empty());
    }
}
