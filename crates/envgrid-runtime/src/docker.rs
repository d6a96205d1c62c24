//! Docker compose runtime.
//!
//! Each deployment is a compose project named after its id. Compose runs
//! in compatibility mode so containers are named `{id}_{service}_1`, which
//! is the address the request forwarder and network manager rely on.
//!
//! Only running containers count as live. A project whose containers all
//! exited is inactive: it can be replayed and its directory reclaimed.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use envgrid_core::{DeploymentId, ResourceDescriptor, RuntimeKind};
use tracing::{debug, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::process::{argv, ProcessOutput, ProcessRunner};
use crate::runtime::{collect_ids, run_checked, WorkloadRuntime};

/// Label docker compose puts on every container of a project.
pub const PROJECT_LABEL: &str = "com.docker.compose.project";

const STATUS_FORMAT: &str = "{{.ID}};{{.Names}};{{.Status}};{{.Image}}";

pub struct DockerCompose<P: ProcessRunner> {
    runner: Arc<P>,
}

impl<P: ProcessRunner> DockerCompose<P> {
    pub fn new(runner: Arc<P>) -> Self {
        Self { runner }
    }

    fn compose_argv(id: &str, manifest: Option<&Path>, tail: &[&str]) -> Vec<String> {
        let mut cmd = argv(["docker", "compose", "--compatibility"]);
        if let Some(path) = manifest {
            cmd.push("-f".to_string());
            cmd.push(path.display().to_string());
        }
        cmd.push("-p".to_string());
        cmd.push(id.to_string());
        cmd.extend(tail.iter().map(|s| s.to_string()));
        cmd
    }
}

#[async_trait]
impl<P: ProcessRunner> WorkloadRuntime for DockerCompose<P> {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    fn manifest_file_name(&self) -> &'static str {
        "docker-compose.yml"
    }

    async fn ping(&self) -> bool {
        match self
            .runner
            .run(&argv(["docker", "info", "--format", "{{.ServerVersion}}"]))
            .await
        {
            Ok(out) => out.success(),
            Err(e) => {
                debug!(error = %e, "docker ping failed");
                false
            }
        }
    }

    async fn up(&self, id: &str, manifest: &Path) -> RuntimeResult<ProcessOutput> {
        let pull = Self::compose_argv(id, Some(manifest), &["pull", "--quiet"]);
        match self.runner.run(&pull).await {
            Ok(out) if !out.success() => {
                // Locally built or already cached images still come up.
                warn!(deployment_id = %id, stderr = %out.stderr.trim(), "compose pull failed");
            }
            Err(e) => warn!(deployment_id = %id, error = %e, "compose pull failed"),
            Ok(_) => {}
        }

        let up = Self::compose_argv(id, Some(manifest), &["up", "-d"]);
        run_checked(self.runner.as_ref(), &up).await
    }

    async fn down(&self, id: &str, manifest: Option<&Path>) -> RuntimeResult<ProcessOutput> {
        let down = Self::compose_argv(id, manifest, &["down", "-v", "--remove-orphans"]);
        run_checked(self.runner.as_ref(), &down).await
    }

    async fn status(&self, id: &str) -> RuntimeResult<Vec<ResourceDescriptor>> {
        let filter = format!("label={PROJECT_LABEL}={id}");
        let cmd = argv([
            "docker",
            "ps",
            "--filter",
            filter.as_str(),
            "--format",
            STATUS_FORMAT,
        ]);
        let out = run_checked(self.runner.as_ref(), &cmd).await?;
        parse_ps(&out.stdout)
    }

    async fn logs(&self, id: &str, manifest: Option<&Path>) -> RuntimeResult<String> {
        let cmd = Self::compose_argv(id, manifest, &["logs", "--no-color", "--tail", "1000"]);
        let out = run_checked(self.runner.as_ref(), &cmd).await?;
        Ok(out.stdout)
    }

    async fn active_ids(&self) -> RuntimeResult<Vec<DeploymentId>> {
        let format = format!("{{{{.Label \"{PROJECT_LABEL}\"}}}}");
        let cmd = argv(["docker", "ps", "--format", format.as_str()]);
        let out = run_checked(self.runner.as_ref(), &cmd).await?;
        Ok(collect_ids(&out.stdout))
    }

    async fn memory_percent(&self) -> RuntimeResult<f64> {
        let cmd = argv(["docker", "stats", "--no-stream", "--format", "{{.MemPerc}}"]);
        let out = run_checked(self.runner.as_ref(), &cmd).await?;
        parse_mem_percent(&out.stdout)
    }

    fn service_host(&self, id: &str, service: &str) -> String {
        format!("{id}_{service}_1")
    }
}

/// Parse `docker ps` lines in `ID;Names;Status;Image` form.
fn parse_ps(stdout: &str) -> RuntimeResult<Vec<ResourceDescriptor>> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut parts = line.splitn(4, ';');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(name), Some(status)) => Ok(ResourceDescriptor {
                    id: id.trim().to_string(),
                    name: name.trim().to_string(),
                    status: status.trim().to_string(),
                    image: parts
                        .next()
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty()),
                }),
                _ => Err(RuntimeError::Parse(format!("docker ps line {line:?}"))),
            }
        })
        .collect()
}

/// Sum `docker stats` memory percentages (`12.5%` per line).
fn parse_mem_percent(stdout: &str) -> RuntimeResult<f64> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .try_fold(0.0, |acc, line| {
            line.trim_end_matches('%')
                .parse::<f64>()
                .map(|v| acc + v)
                .map_err(|_| RuntimeError::Parse(format!("docker stats value {line:?}")))
        })
}
