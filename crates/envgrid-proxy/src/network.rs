//! Network attachment of deployment containers to the control plane.
//!
//! The control plane runs in its own docker network, found by listing
//! networks whose name contains a configured fragment. Attaching a
//! deployment's service container to that network makes it reachable by
//! container name.

use std::sync::Arc;

use envgrid_core::{EnvgridError, EnvgridResult, normalize_id};
use envgrid_runtime::{ProcessRunner, RuntimeReply, argv, classify};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachOutcome {
    Connected,
    AlreadyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachOutcome {
    Disconnected,
    NotConnected,
}

/// Compose container name of `service` in deployment `id`.
pub fn container_name(id: &str, service: &str) -> String {
    format!("{id}_{service}_1")
}

pub struct NetworkAttachment<P: ProcessRunner> {
    runner: Arc<P>,
    fragment: String,
}

impl<P: ProcessRunner> NetworkAttachment<P> {
    pub fn new(runner: Arc<P>, fragment: impl Into<String>) -> Self {
        Self {
            runner,
            fragment: fragment.into(),
        }
    }

    /// Name of the control plane's network.
    pub async fn resolve_network(&self) -> EnvgridResult<String> {
        let filter = format!("name={}", self.fragment);
        let out = self
            .runner
            .run(&argv([
                "docker",
                "network",
                "ls",
                "--filter",
                filter.as_str(),
                "--format",
                "{{.Name}}",
            ]))
            .await
            .map_err(|e| EnvgridError::NetworkResolutionFailure(e.to_string()))?;
        if !out.success() {
            return Err(EnvgridError::NetworkResolutionFailure(
                out.stderr.trim().to_string(),
            ));
        }

        let mut names: Vec<&str> = out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        names.sort_unstable();
        match names.first() {
            Some(name) => {
                if names.len() > 1 {
                    debug!(fragment = %self.fragment, candidates = names.len(), chosen = %name, "several networks match");
                }
                Ok(name.to_string())
            }
            None => Err(EnvgridError::NetworkResolutionFailure(format!(
                "no network name contains {:?}",
                self.fragment
            ))),
        }
    }

    async fn target_network(&self, explicit: Option<&str>) -> EnvgridResult<String> {
        match explicit {
            Some(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
            _ => self.resolve_network().await,
        }
    }

    /// Attach `service` of deployment `id` to the control-plane network.
    pub async fn connect(
        &self,
        id: &str,
        service: &str,
        network: Option<&str>,
    ) -> EnvgridResult<AttachOutcome> {
        let id = normalize_id(id)?;
        let network = self.target_network(network).await?;
        let container = container_name(&id, service);

        let out = self
            .runner
            .run(&argv(["docker", "network", "connect", network.as_str(), container.as_str()]))
            .await
            .map_err(|e| EnvgridError::NetworkConnectFailure(e.to_string()))?;
        if out.success() {
            info!(deployment_id = %id, %network, %container, "container attached to network");
            return Ok(AttachOutcome::Connected);
        }
        match classify(&out.stderr) {
            RuntimeReply::AlreadyConnected => {
                debug!(deployment_id = %id, %network, %container, "container already attached");
                Ok(AttachOutcome::AlreadyConnected)
            }
            _ => Err(EnvgridError::NetworkConnectFailure(
                out.stderr.trim().to_string(),
            )),
        }
    }

    /// Detach `service` of deployment `id` from the control-plane network.
    pub async fn disconnect(
        &self,
        id: &str,
        service: &str,
        network: Option<&str>,
    ) -> EnvgridResult<DetachOutcome> {
        let id = normalize_id(id)?;
        let network = self.target_network(network).await?;
        let container = container_name(&id, service);

        let out = self
            .runner
            .run(&argv(["docker", "network", "disconnect", network.as_str(), container.as_str()]))
            .await
            .map_err(|e| EnvgridError::NetworkDisconnectFailure(e.to_string()))?;
        if out.success() {
            info!(deployment_id = %id, %network, %container, "container detached from network");
            return Ok(DetachOutcome::Disconnected);
        }
        match classify(&out.stderr) {
            RuntimeReply::NotConnected => Ok(DetachOutcome::NotConnected),
            _ => Err(EnvgridError::NetworkDisconnectFailure(
                out.stderr.trim().to_string(),
            )),
        }
    }
}
