//! kubectl runtime.
//!
//! Each deployment gets its own namespace named after its id, labelled
//! `envgrid.io/deployment=true`. The manifest is applied into that
//! namespace and tearing the deployment down deletes the namespace.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use envgrid_core::{DeploymentId, ResourceDescriptor, RuntimeKind};
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::process::{argv, display_command, ProcessOutput, ProcessRunner};
use crate::replies::{classify, RuntimeReply};
use crate::runtime::{collect_ids, run_checked, WorkloadRuntime};

/// Label marking namespaces owned by envgrid.
pub const NAMESPACE_LABEL: &str = "envgrid.io/deployment";

const POD_COLUMNS: &str = "UID:.metadata.uid,NAME:.metadata.name,STATUS:.status.phase,IMAGE:.spec.containers[0].image";

pub struct Kubectl<P: ProcessRunner> {
    runner: Arc<P>,
}

impl<P: ProcessRunner> Kubectl<P> {
    pub fn new(runner: Arc<P>) -> Self {
        Self { runner }
    }

    async fn ensure_namespace(&self, id: &str) -> RuntimeResult<()> {
        let create = argv(["kubectl", "create", "namespace", id]);
        let out = self.runner.run(&create).await?;
        if !out.success() && classify(&out.stderr) != RuntimeReply::AlreadyExists {
            return Err(RuntimeError::CommandFailed {
                command: display_command(&create),
                code: out.exit_code(),
                stderr: out.stderr.trim().to_string(),
            });
        }
        let label = format!("{NAMESPACE_LABEL}=true");
        run_checked(
            self.runner.as_ref(),
            &argv(["kubectl", "label", "namespace", id, label.as_str(), "--overwrite"]),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl<P: ProcessRunner> WorkloadRuntime for Kubectl<P> {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Kubectl
    }

    fn manifest_file_name(&self) -> &'static str {
        "k8s-manifest.yml"
    }

    async fn ping(&self) -> bool {
        match self.runner.run(&argv(["kubectl", "get", "--raw", "/readyz"])).await {
            Ok(out) => out.success(),
            Err(e) => {
                debug!(error = %e, "kubectl ping failed");
                false
            }
        }
    }

    async fn up(&self, id: &str, manifest: &Path) -> RuntimeResult<ProcessOutput> {
        self.ensure_namespace(id).await?;
        let path = manifest.display().to_string();
        run_checked(
            self.runner.as_ref(),
            &argv(["kubectl", "apply", "-n", id, "-f", path.as_str()]),
        )
        .await
    }

    async fn down(&self, id: &str, manifest: Option<&Path>) -> RuntimeResult<ProcessOutput> {
        if let Some(path) = manifest {
            // Cluster-scoped objects from the manifest outlive the namespace.
            let path = path.display().to_string();
            run_checked(
                self.runner.as_ref(),
                &argv([
                    "kubectl",
                    "delete",
                    "-n",
                    id,
                    "-f",
                    path.as_str(),
                    "--ignore-not-found=true",
                ]),
            )
            .await?;
        }
        run_checked(
            self.runner.as_ref(),
            &argv(["kubectl", "delete", "namespace", id, "--ignore-not-found=true"]),
        )
        .await
    }

    async fn status(&self, id: &str) -> RuntimeResult<Vec<ResourceDescriptor>> {
        let columns = format!("custom-columns={POD_COLUMNS}");
        let cmd = argv([
            "kubectl",
            "get",
            "pods",
            "-n",
            id,
            "--no-headers",
            "-o",
            columns.as_str(),
        ]);
        let out = run_checked(self.runner.as_ref(), &cmd).await?;
        parse_pods(&out.stdout)
    }

    async fn logs(&self, id: &str, _manifest: Option<&Path>) -> RuntimeResult<String> {
        let mut logs = String::new();
        for pod in self.status(id).await? {
            let cmd = argv([
                "kubectl",
                "logs",
                "-n",
                id,
                pod.name.as_str(),
                "--all-containers=true",
                "--tail=1000",
            ]);
            let out = run_checked(self.runner.as_ref(), &cmd).await?;
            logs.push_str(&format!("==> {} <==\n", pod.name));
            logs.push_str(&out.stdout);
        }
        Ok(logs)
    }

    async fn active_ids(&self) -> RuntimeResult<Vec<DeploymentId>> {
        let selector = format!("{NAMESPACE_LABEL}=true");
        let cmd = argv([
            "kubectl",
            "get",
            "namespaces",
            "-l",
            selector.as_str(),
            "--no-headers",
            "-o",
            "custom-columns=NAME:.metadata.name",
        ]);
        let out = run_checked(self.runner.as_ref(), &cmd).await?;
        Ok(collect_ids(&out.stdout))
    }

    async fn memory_percent(&self) -> RuntimeResult<f64> {
        let out = run_checked(
            self.runner.as_ref(),
            &argv(["kubectl", "top", "nodes", "--no-headers"]),
        )
        .await?;
        parse_top_nodes(&out.stdout)
    }

    fn service_host(&self, id: &str, service: &str) -> String {
        format!("{service}.{id}.svc.cluster.local")
    }
}

/// Parse `kubectl get pods` custom-column output (UID NAME STATUS IMAGE).
fn parse_pods(stdout: &str) -> RuntimeResult<Vec<ResourceDescriptor>> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            match cols.as_slice() {
                [uid, name, status, rest @ ..] => Ok(ResourceDescriptor {
                    id: uid.to_string(),
                    name: name.to_string(),
                    status: status.to_string(),
                    image: rest
                        .first()
                        .filter(|s| **s != "<none>")
                        .map(|s| s.to_string()),
                }),
                _ => Err(RuntimeError::Parse(format!("kubectl pods line {line:?}"))),
            }
        })
        .collect()
}

/// Average the MEMORY% column of `kubectl top nodes --no-headers`.
fn parse_top_nodes(stdout: &str) -> RuntimeResult<f64> {
    let mut total = 0.0;
    let mut nodes = 0usize;
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let value = line
            .split_whitespace()
            .nth(4)
            .and_then(|v| v.trim_end_matches('%').parse::<f64>().ok())
            .ok_or_else(|| RuntimeError::Parse(format!("kubectl top line {line:?}")))?;
        total += value;
        nodes += 1;
    }
    if nodes == 0 {
        return Ok(0.0);
    }
    Ok(total / nodes as f64)
}
