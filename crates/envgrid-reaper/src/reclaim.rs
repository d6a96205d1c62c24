//! FolderReclaimer — removes directories left behind by dead deployments.

use std::sync::Arc;
use std::time::Duration;

use envgrid_core::{DeploymentId, EnvgridResult};
use envgrid_deployer::Orchestrator;
use envgrid_runtime::WorkloadRuntime;
use tracing::debug;

use crate::task::{PeriodicTask, TaskFuture};

pub struct FolderReclaimer<R: WorkloadRuntime> {
    orchestrator: Arc<Orchestrator<R>>,
    delete_period: Duration,
}

impl<R: WorkloadRuntime> FolderReclaimer<R> {
    pub fn new(orchestrator: Arc<Orchestrator<R>>, delete_period: Duration) -> Self {
        Self {
            orchestrator,
            delete_period,
        }
    }

    /// Remove every directory whose id is not active and which has not been
    /// modified for longer than `delete_period`.
    pub async fn run_once(&self) -> EnvgridResult<Vec<DeploymentId>> {
        let reclaimed = self.orchestrator.reclaim_orphans(self.delete_period).await?;
        debug!(count = reclaimed.len(), "folder reclamation pass finished");
        Ok(reclaimed)
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> PeriodicTask {
        PeriodicTask::start("reclaim", interval, move || -> TaskFuture {
            let reclaimer = self.clone();
            Box::pin(async move {
                reclaimer.run_once().await?;
                Ok(())
            })
        })
    }
}
