//! envgrid-runtime — process execution and workload runtimes.
//!
//! Everything envgrid knows about docker and kubectl lives here. The
//! deployment engine talks to a [`WorkloadRuntime`], which is implemented
//! on top of a [`ProcessRunner`].
//!
//! # Architecture
//!
//! ```text
//! WorkloadRuntime (capability)
//!   ├── DockerCompose  — `docker compose -p <id>` projects
//!   └── Kubectl        — one namespace per deployment
//!         │
//!         └── ProcessRunner (TokioProcessRunner in production)
//! ```
//!
//! Runtime error text is interpreted in exactly one place,
//! [`replies::classify`], so coupling to the CLI message format stays
//! contained.

pub mod docker;
pub mod error;
pub mod kubectl;
pub mod process;
pub mod replies;
pub mod runtime;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use docker::DockerCompose;
pub use error::{ProcessError, RuntimeError, RuntimeResult};
pub use kubectl::Kubectl;
pub use process::{ProcessOutput, ProcessRunner, TokioProcessRunner, argv, display_command};
pub use replies::{RuntimeReply, classify};
pub use runtime::{Runtime, WorkloadRuntime};
