//! Oncore Storage Crate
//!
//! Persistent storage for the escalation core, backed by redb:
//!
//! - **Alert groups**: versioned records with a compare-and-set update used
//!   by the state machine's optimistic concurrency control.
//! - **Pending tasks**: durable buffer for scheduled tasks that failed to
//!   enqueue, replayed once the task queue is reachable again.

pub mod alert_groups;
pub mod error;
pub mod pending_tasks;

pub use alert_groups::{AlertGroupStore, StoredAlertGroup};
pub use error::{Error, Result};
pub use pending_tasks::PendingTaskStore;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
