//! ExpiryReaper — stops deployments that outlived their lifetime.

use std::sync::Arc;
use std::time::Duration;

use envgrid_core::{DeploymentId, EnvgridResult};
use envgrid_deployer::Orchestrator;
use envgrid_runtime::WorkloadRuntime;
use tracing::{debug, error, info};

use crate::task::{PeriodicTask, TaskFuture};

pub struct ExpiryReaper<R: WorkloadRuntime> {
    orchestrator: Arc<Orchestrator<R>>,
    expire_after: Duration,
}

impl<R: WorkloadRuntime> ExpiryReaper<R> {
    pub fn new(orchestrator: Arc<Orchestrator<R>>, expire_after: Duration) -> Self {
        Self {
            orchestrator,
            expire_after,
        }
    }

    /// Stop every active deployment whose directory is older than
    /// `expire_after`. Returns the ids that were stopped.
    ///
    /// Active ids without a directory have no lifecycle clock and are left
    /// alone. A failed stop is logged and the sweep continues.
    pub async fn run_once(&self) -> EnvgridResult<Vec<DeploymentId>> {
        let mut expired = Vec::new();
        for id in self.orchestrator.active_ids().await? {
            let Some(age) = self.orchestrator.age(&id).await else {
                debug!(deployment_id = %id, "no deployment directory, skipping expiry");
                continue;
            };
            if age <= self.expire_after {
                continue;
            }
            match self.orchestrator.stop(&id).await {
                Ok(_) => {
                    info!(deployment_id = %id, age_secs = age.as_secs(), "expired deployment reclaimed");
                    expired.push(id);
                }
                Err(e) => error!(deployment_id = %id, error = %e, "failed to stop expired deployment"),
            }
        }
        Ok(expired)
    }

    /// Run [`ExpiryReaper::run_once`] every `interval`.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> PeriodicTask {
        PeriodicTask::start("expiry", interval, move || -> TaskFuture {
            let reaper = self.clone();
            Box::pin(async move {
                reaper.run_once().await?;
                Ok(())
            })
        })
    }
}
