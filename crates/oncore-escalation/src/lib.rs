//! Oncore Escalation Crate
//!
//! The escalation engine: alert group lifecycle, escalation snapshots, the
//! step executor, the delayed-task scheduler and the engine that ties them
//! together.
//!
//! ## Model
//!
//! - An [`AlertGroup`](alert_group::AlertGroup) is the unit of escalation.
//!   When escalation starts, the live chain is frozen into an
//!   [`EscalationSnapshot`](snapshot::EscalationSnapshot) owned by the
//!   group; later edits of the chain never affect an in-flight walk.
//! - The walk advances one step per delivered task. Delivery is
//!   at-least-once and unordered relative to user actions, so every
//!   delivery re-checks group state, fencing id and cursor position before
//!   acting ([`engine::EscalationEngine`]).
//! - User actions (acknowledge, resolve, silence, attach) go through the
//!   [`AlertGroupStateMachine`](state_machine::AlertGroupStateMachine),
//!   which serializes per group and persists through a compare-and-set
//!   repository.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use oncore_core::queue::MemoryTaskQueue;
//! use oncore_escalation::{
//!     AlertGroupStateMachine, EscalationConfig, EscalationEngine,
//!     EscalationPolicyExecutor, EscalationScheduler, LockRegistry,
//!     MemoryAlertGroups, MemoryAuditLog, MemoryRouting, MemoryWebhookTrigger,
//!     StaticOnCallResolver,
//! };
//! use oncore_notify::{
//!     BackendRegistry, MemoryUserDirectory, NotificationDispatch, PersonalLogStore,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EscalationConfig::default();
//!     let repository = Arc::new(MemoryAlertGroups::new());
//!     let routing = Arc::new(MemoryRouting::new());
//!     let queue = Arc::new(MemoryTaskQueue::new());
//!     let scheduler = Arc::new(EscalationScheduler::new(queue.clone()));
//!     let audit = Arc::new(MemoryAuditLog::new());
//!     let locks = Arc::new(LockRegistry::new());
//!
//!     let state_machine = Arc::new(AlertGroupStateMachine::new(
//!         repository.clone(),
//!         routing.clone(),
//!         scheduler.clone(),
//!         audit.clone(),
//!         locks.clone(),
//!         config.clone(),
//!     ));
//!     let executor = Arc::new(EscalationPolicyExecutor::new(
//!         config.clone(),
//!         Arc::new(StaticOnCallResolver::new()),
//!         Arc::new(MemoryWebhookTrigger::new()),
//!         audit.clone(),
//!     ));
//!     let dispatch = Arc::new(NotificationDispatch::new(
//!         Arc::new(BackendRegistry::new()),
//!         Arc::new(PersonalLogStore::new()),
//!     ));
//!
//!     let engine = EscalationEngine::new(
//!         repository,
//!         state_machine,
//!         executor,
//!         scheduler,
//!         dispatch,
//!         Arc::new(MemoryUserDirectory::new()),
//!         audit,
//!         locks,
//!         config,
//!     );
//!
//!     let group = engine
//!         .create_alert_group("grafana", None, "High CPU", "CPU above 95%", serde_json::json!({}))
//!         .await
//!         .unwrap();
//!     println!("created alert group {}", group.id);
//! }
//! ```

pub mod alert_group;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod log_records;
pub mod repository;
pub mod scheduler;
pub mod snapshot;
pub mod state_machine;

pub use alert_group::{Alert, AlertGroup, AlertGroupState};
pub use chain::{
    ChannelFilter, EscalationChain, EscalationPolicy, EscalationStep, MemoryRouting,
    RoutingProvider,
};
pub use config::EscalationConfig;
pub use engine::EscalationEngine;
pub use error::{Error, Result};
pub use executor::{
    EscalationPolicyExecutor, ExecutionOutcome, MemoryWebhookTrigger, NotificationRequest,
    OnCallResolver, StaticOnCallResolver, WebhookTrigger,
};
pub use log_records::{AlertGroupLogRecord, AlertGroupLogType, AuditLog, MemoryAuditLog};
pub use repository::{AlertGroupRepository, MemoryAlertGroups, RedbAlertGroups};
pub use scheduler::EscalationScheduler;
pub use snapshot::{
    ChannelFilterSnapshot, EscalationChainSnapshot, EscalationPolicySnapshot, EscalationSnapshot,
};
pub use state_machine::{AlertGroupStateMachine, LockRegistry, TransitionOutcome};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
