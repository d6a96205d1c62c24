//! envgrid-deployer — the deployment lifecycle engine.
//!
//! Brings a deployment from request to live workload and back:
//!
//! ```text
//! start ─► AdmissionController ─► id ─► TemplateRenderer ─► FilesystemStore
//!                                                              │
//!            MetadataStore ◄── x-metadata ◄── status ◄── WorkloadRuntime::up
//! ```
//!
//! Any failure after the deployment directory exists rolls the deployment
//! back (runtime `down`, directory removed) so the id is free again.

pub mod admission;
pub mod metadata;
pub mod orchestrator;
pub mod render;

pub use admission::{AdmissionController, AdmissionPolicy};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use render::{FileTemplateRenderer, TemplateRenderer, DISCOVERY_MARKER};
