//! The workload runtime capability.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use envgrid_core::{DeploymentId, ResourceDescriptor, RuntimeKind};

use crate::docker::DockerCompose;
use crate::error::{RuntimeError, RuntimeResult};
use crate::kubectl::Kubectl;
use crate::process::{display_command, ProcessOutput, ProcessRunner};

/// Brings deployments up and down and inspects their live resources.
///
/// Implementations must be idempotent for `down`: tearing down an unknown
/// or already-stopped deployment succeeds.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync + 'static {
    fn kind(&self) -> RuntimeKind;

    /// File name the rendered manifest is stored under.
    fn manifest_file_name(&self) -> &'static str;

    /// Liveness probe for the container engine or cluster API.
    async fn ping(&self) -> bool;

    async fn up(&self, id: &str, manifest: &Path) -> RuntimeResult<ProcessOutput>;

    async fn down(&self, id: &str, manifest: Option<&Path>) -> RuntimeResult<ProcessOutput>;

    /// Live resources belonging to `id`. Zero matches is `Ok(vec![])`.
    async fn status(&self, id: &str) -> RuntimeResult<Vec<ResourceDescriptor>>;

    async fn logs(&self, id: &str, manifest: Option<&Path>) -> RuntimeResult<String>;

    /// Ids of every deployment with at least one live resource.
    async fn active_ids(&self) -> RuntimeResult<Vec<DeploymentId>>;

    /// Aggregate memory usage in percent.
    async fn memory_percent(&self) -> RuntimeResult<f64>;

    /// Host name under which `service` of deployment `id` is reachable from
    /// the control plane.
    fn service_host(&self, id: &str, service: &str) -> String;
}

/// Run a command and turn a nonzero exit into `RuntimeError::CommandFailed`.
pub(crate) async fn run_checked<P: ProcessRunner + ?Sized>(
    runner: &P,
    argv: &[String],
) -> RuntimeResult<ProcessOutput> {
    let out = runner.run(argv).await?;
    if out.success() {
        Ok(out)
    } else {
        Err(RuntimeError::CommandFailed {
            command: display_command(argv),
            code: out.exit_code(),
            stderr: out.stderr.trim().to_string(),
        })
    }
}

/// Sorted, de-duplicated, lower-cased ids from one-id-per-line output.
pub(crate) fn collect_ids(stdout: &str) -> Vec<DeploymentId> {
    let mut ids: Vec<DeploymentId> = stdout
        .lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty() && l != "<none>" && l != "<no value>")
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Runtime selected once from configuration.
pub enum Runtime<P: ProcessRunner> {
    Docker(DockerCompose<P>),
    Kubectl(Kubectl<P>),
}

impl<P: ProcessRunner> Runtime<P> {
    pub fn from_kind(kind: RuntimeKind, runner: Arc<P>) -> Self {
        match kind {
            RuntimeKind::Docker => Runtime::Docker(DockerCompose::new(runner)),
            RuntimeKind::Kubectl => Runtime::Kubectl(Kubectl::new(runner)),
        }
    }
}

#[async_trait]
impl<P: ProcessRunner> WorkloadRuntime for Runtime<P> {
    fn kind(&self) -> RuntimeKind {
        match self {
            Runtime::Docker(r) => r.kind(),
            Runtime::Kubectl(r) => r.kind(),
        }
    }

    fn manifest_file_name(&self) -> &'static str {
        match self {
            Runtime::Docker(r) => r.manifest_file_name(),
            Runtime::Kubectl(r) => r.manifest_file_name(),
        }
    }

    async fn ping(&self) -> bool {
        match self {
            Runtime::Docker(r) => r.ping().await,
            Runtime::Kubectl(r) => r.ping().await,
        }
    }

    async fn up(&self, id: &str, manifest: &Path) -> RuntimeResult<ProcessOutput> {
        match self {
            Runtime::Docker(r) => r.up(id, manifest).await,
            Runtime::Kubectl(r) => r.up(id, manifest).await,
        }
    }

    async fn down(&self, id: &str, manifest: Option<&Path>) -> RuntimeResult<ProcessOutput> {
        match self {
            Runtime::Docker(r) => r.down(id, manifest).await,
            Runtime::Kubectl(r) => r.down(id, manifest).await,
        }
    }

    async fn status(&self, id: &str) -> RuntimeResult<Vec<ResourceDescriptor>> {
        match self {
            Runtime::Docker(r) => r.status(id).await,
            Runtime::Kubectl(r) => r.status(id).await,
        }
    }

    async fn logs(&self, id: &str, manifest: Option<&Path>) -> RuntimeResult<String> {
        match self {
            Runtime::Docker(r) => r.logs(id, manifest).await,
            Runtime::Kubectl(r) => r.logs(id, manifest).await,
        }
    }

    async fn active_ids(&self) -> RuntimeResult<Vec<DeploymentId>> {
        match self {
            Runtime::Docker(r) => r.active_ids().await,
            Runtime::Kubectl(r) => r.active_ids().await,
        }
    }

    async fn memory_percent(&self) -> RuntimeResult<f64> {
        match self {
            Runtime::Docker(r) => r.memory_percent().await,
            Runtime::Kubectl(r) => r.memory_percent().await,
        }
    }

    fn service_host(&self, id: &str, service: &str) -> String {
        match self {
            Runtime::Docker(r) => r.service_host(id, service),
            Runtime::Kubectl(r) => r.service_host(id, service),
        }
    }
}
