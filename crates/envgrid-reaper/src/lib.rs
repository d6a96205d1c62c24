//! envgrid-reaper — background reclamation of abandoned deployments.
//!
//! Two independently owned periodic tasks share the orchestrator with the
//! request path:
//!
//! ```text
//! PeriodicTask("expiry",  expiry_interval)  ─► ExpiryReaper::run_once
//!     active deployments older than expire_after are stopped
//! PeriodicTask("reclaim", reclaim_interval) ─► FolderReclaimer::run_once
//!     inactive directories older than delete_period are removed
//! ```
//!
//! A failing or panicking tick is logged and the timer keeps running.

pub mod expiry;
pub mod reclaim;
pub mod task;

pub use expiry::ExpiryReaper;
pub use reclaim::FolderReclaimer;
pub use task::{PeriodicTask, TaskFuture};
