//! Admission control for new deployments.
//!
//! Checks run in a fixed order and the first failing one decides the
//! rejection: runtime liveness, memory pressure, deployment count. Each
//! check is a snapshot; two concurrent starts may both be admitted.
//!
//! Only deployments with a directory under the deployments root count.
//! The runtime may host unrelated projects (other compose stacks on the
//! same docker daemon) and those never take a slot.

use std::collections::HashSet;
use std::sync::Arc;

use envgrid_core::{DeploymentId, EnvgridConfig, EnvgridError, EnvgridResult, Rejection};
use envgrid_runtime::WorkloadRuntime;
use envgrid_state::FilesystemStore;
use tracing::{debug, warn};

/// Thresholds a new deployment is checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionPolicy {
    pub max_deployments: usize,
    /// `None` disables the memory check.
    pub max_memory_percent: Option<f64>,
}

impl AdmissionPolicy {
    pub fn from_config(config: &EnvgridConfig) -> Self {
        Self {
            max_deployments: config.max_deployments,
            max_memory_percent: config.max_memory_percent,
        }
    }
}

/// Runtime-reported ids that also have a deployment directory under `fs`.
pub async fn managed_ids<R: WorkloadRuntime>(
    runtime: &R,
    fs: &FilesystemStore,
) -> EnvgridResult<Vec<DeploymentId>> {
    let live = runtime.active_ids().await.map_err(|e| {
        EnvgridError::status_failed("runtime status query", Some(Box::new(e)))
    })?;
    let owned: HashSet<DeploymentId> = fs.list_ids().await?.into_iter().collect();
    Ok(live.into_iter().filter(|id| owned.contains(id)).collect())
}

pub struct AdmissionController<R: WorkloadRuntime> {
    runtime: Arc<R>,
    fs: FilesystemStore,
    policy: AdmissionPolicy,
}

impl<R: WorkloadRuntime> AdmissionController<R> {
    pub fn new(runtime: Arc<R>, fs: FilesystemStore, policy: AdmissionPolicy) -> Self {
        Self {
            runtime,
            fs,
            policy,
        }
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Decide whether one more deployment may start right now.
    pub async fn try_admit(&self) -> Result<(), Rejection> {
        if !self.runtime.ping().await {
            warn!("admission rejected: runtime did not answer ping");
            return Err(Rejection::RuntimeUnavailable);
        }

        if let Some(ceiling) = self.policy.max_memory_percent {
            let measured = self.runtime.memory_percent().await.map_err(|e| {
                warn!(error = %e, "admission rejected: memory usage unavailable");
                Rejection::RuntimeUnavailable
            })?;
            if measured >= ceiling {
                warn!(measured, ceiling, "admission rejected: memory pressure");
                return Err(Rejection::ResourcePressure { measured, ceiling });
            }
        }

        let active = managed_ids(self.runtime.as_ref(), &self.fs).await.map_err(|e| {
            warn!(error = %e, "admission rejected: active deployments unavailable");
            Rejection::RuntimeUnavailable
        })?;
        if active.len() >= self.policy.max_deployments {
            warn!(
                active = active.len(),
                max = self.policy.max_deployments,
                "admission rejected: capacity reached"
            );
            return Err(Rejection::CapacityReached {
                max: self.policy.max_deployments,
            });
        }

        debug!(active = active.len(), "deployment admitted");
        Ok(())
    }
}
