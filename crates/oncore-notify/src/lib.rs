//! Oncore Notify Crate
//!
//! Per-user notification machinery for the escalation engine: ordered
//! notification policies, the backend capability trait with its startup-time
//! registry, the dispatcher that walks a user's chain one step per task
//! delivery, and the append-only per-attempt audit trail.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `webhook` | ✅ | Webhook notification backend via reqwest |
//! | `email` | ✅ | Email notification backend via SMTP |
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oncore_core::{IncidentView, User};
//! use oncore_core::ids::AlertGroupId;
//! use oncore_notify::{
//!     BackendRegistry, MemoryBackend, NotificationDispatch, PersonalLogStore,
//!     UserNotificationPolicy,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(BackendRegistry::new());
//!     registry.register(Arc::new(MemoryBackend::new("memory"))).await;
//!
//!     let log = Arc::new(PersonalLogStore::new());
//!     let dispatch = NotificationDispatch::new(registry, log);
//!
//!     let user = User::new("alice");
//!     let policies = vec![UserNotificationPolicy::notify(user.id.clone(), 0, "memory")];
//!     let incident = IncidentView {
//!         alert_group_id: AlertGroupId::new(),
//!         title: "High CPU".into(),
//!         message: "CPU above 95%".into(),
//!         integration_id: "grafana".into(),
//!         state: "firing".into(),
//!     };
//!
//!     dispatch.notify(&user, &incident, &policies, None).await;
//! }
//! ```

pub mod backend;
pub mod backends;
pub mod dispatch;
pub mod error;
pub mod log;
pub mod policy;

pub use backend::{BackendRegistry, NotificationBackend};
pub use backends::{ConsoleBackend, MemoryBackend};
#[cfg(feature = "email")]
pub use backends::EmailBackend;
#[cfg(feature = "webhook")]
pub use backends::WebhookBackend;
pub use dispatch::{DispatchOutcome, NotificationDispatch};
pub use error::{Error, Result};
pub use log::{PersonalLogStore, PersonalLogType, UserNotificationPolicyLogRecord};
pub use policy::{
    next_policy, MemoryUserDirectory, NotificationPolicyStep, UserDirectory,
    UserNotificationPolicy, DEFAULT_NOTIFICATION_BACKEND,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
