//! Oncore Core Crate
//!
//! Foundational types shared by the Oncore escalation engine: identifier
//! newtypes, the user model, the minimal incident view handed to notification
//! backends, and the delayed task queue abstractions that drive escalation.
//!
//! ## Task queue model
//!
//! All escalation work runs as independently queued units of work with
//! at-least-once delivery (see [`queue`]). Nothing in this crate assumes a
//! single event loop or exactly-once semantics; correctness is achieved by
//! idempotent handlers in the consuming crates.

pub mod error;
pub mod ids;
pub mod incident;
pub mod queue;
pub mod user;

pub use error::{Error, Result};
pub use ids::{AlertGroupId, AlertId, UserId};
pub use incident::IncidentView;
pub use queue::{
    MemoryTaskQueue, ScheduledTask, TaskHandler, TaskKind, TaskQueue, TokioTaskQueue,
};
pub use user::User;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
