//! Orchestrator — owns the deployment lifecycle.
//!
//! A deployment is observable as active only after its manifest is on disk,
//! the runtime reports at least one live resource, and its metadata is
//! stored. Every earlier failure is rolled back before the error returns.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use envgrid_core::{
    BoxError, DeploymentId, DeploymentInfo, DeploymentStarted, EnvgridConfig, EnvgridError,
    EnvgridResult, ManifestSource, ResourceDescriptor, StartRequest, generate_id, normalize_id,
};
use envgrid_runtime::{RuntimeError, WorkloadRuntime};
use envgrid_state::{FilesystemStore, MetadataStore, StateError};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionController, AdmissionPolicy, managed_ids};
use crate::metadata;
use crate::render::{FileTemplateRenderer, TemplateRenderer, inject_discovery, merge_variables};

/// Process-wide inputs to rendering and reclamation.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_template: String,
    pub default_variables: String,
    pub discovery_server: Option<String>,
    /// Environment snapshot merged with the config variables table.
    pub process_variables: HashMap<String, String>,
    /// Minimum age of an orphaned directory before it is reclaimed.
    pub delete_period: Duration,
}

impl OrchestratorSettings {
    pub fn from_config<I>(config: &EnvgridConfig, env: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            default_template: config.template.clone(),
            default_variables: config.variables.clone(),
            discovery_server: config.discovery_server.clone(),
            process_variables: config.process_variables(env),
            delete_period: config.delete_period(),
        }
    }
}

fn boxed<E: std::error::Error + Send + Sync + 'static>(err: E) -> Option<BoxError> {
    Some(Box::new(err))
}

fn status_err(err: RuntimeError) -> EnvgridError {
    EnvgridError::status_failed("runtime status query", boxed(err))
}

/// The deployment lifecycle engine.
pub struct Orchestrator<R: WorkloadRuntime> {
    runtime: Arc<R>,
    admission: AdmissionController<R>,
    renderer: Arc<dyn TemplateRenderer>,
    fs: FilesystemStore,
    metadata: Arc<MetadataStore>,
    settings: OrchestratorSettings,
}

impl<R: WorkloadRuntime> Orchestrator<R> {
    pub fn new(
        runtime: Arc<R>,
        renderer: Arc<dyn TemplateRenderer>,
        fs: FilesystemStore,
        metadata: Arc<MetadataStore>,
        policy: AdmissionPolicy,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            admission: AdmissionController::new(runtime.clone(), fs.clone(), policy),
            runtime,
            renderer,
            fs,
            metadata,
            settings,
        }
    }

    /// Wire an orchestrator from config, snapshotting the process environment.
    pub fn from_config(runtime: Arc<R>, config: &EnvgridConfig) -> Self {
        Self::new(
            runtime,
            Arc::new(FileTemplateRenderer::new(
                &config.templates_dir,
                &config.vars_dir,
            )),
            FilesystemStore::new(&config.deployments_dir),
            Arc::new(MetadataStore::new(config.metadata_capacity)),
            AdmissionPolicy::from_config(config),
            OrchestratorSettings::from_config(config, std::env::vars()),
        )
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn filesystem(&self) -> &FilesystemStore {
        &self.fs
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Admit, materialize, and bring up a new deployment.
    pub async fn start(&self, request: StartRequest) -> EnvgridResult<DeploymentStarted> {
        self.admission
            .try_admit()
            .await
            .map_err(EnvgridError::AdmissionRejected)?;

        let id = match request.requested_id.as_deref() {
            Some(raw) => normalize_id(raw)?,
            None => generate_id()?,
        };

        let manifest = match &request.source {
            ManifestSource::Template {
                template,
                variables,
            } => {
                self.render_manifest(
                    &id,
                    template.as_deref(),
                    variables.as_deref(),
                    &request.overrides,
                )
                .await?
            }
            ManifestSource::Raw(text) => {
                if text.trim().is_empty() {
                    return Err(EnvgridError::EmptyBody);
                }
                text.clone()
            }
        };

        self.fs.create_dir(&id).await.map_err(|e| match e {
            StateError::Conflict(existing) => EnvgridError::DeploymentConflict(existing),
            other => EnvgridError::start_failed(&id, "create deployment directory", boxed(other)),
        })?;

        match self.launch(&id, &manifest).await {
            Ok(started) => {
                info!(
                    deployment_id = %id,
                    resources = started.resources.len(),
                    "deployment started"
                );
                Ok(started)
            }
            Err(e) => {
                warn!(deployment_id = %id, error = %e, "deployment start failed");
                self.rollback(&id, true).await;
                Err(e)
            }
        }
    }

    /// Live resources of `id`; an unknown id has none.
    pub async fn status(&self, id: &str) -> EnvgridResult<Vec<ResourceDescriptor>> {
        let id = normalize_id(id)?;
        self.runtime.status(&id).await.map_err(status_err)
    }

    /// Tear down `id` and return whatever is still live afterwards.
    ///
    /// Stopping an unknown or already stopped deployment succeeds.
    pub async fn stop(&self, id: &str) -> EnvgridResult<Vec<ResourceDescriptor>> {
        let id = normalize_id(id)?;
        let manifest = self.existing_manifest(&id).await;
        self.runtime
            .down(&id, manifest.as_deref())
            .await
            .map_err(|e| EnvgridError::stop_failed(&id, "workload teardown", boxed(e)))?;
        self.metadata.delete(&id).await;
        self.fs
            .remove_dir(&id)
            .await
            .map_err(|e| EnvgridError::stop_failed(&id, "remove deployment directory", boxed(e)))?;

        let remaining = self.runtime.status(&id).await.map_err(status_err)?;
        info!(deployment_id = %id, remaining = remaining.len(), "deployment stopped");
        Ok(remaining)
    }

    /// Stop every active deployment, then reclaim orphaned directories.
    ///
    /// Returns the ids still active afterwards.
    pub async fn stop_all(&self) -> EnvgridResult<Vec<DeploymentId>> {
        let ids = self.active_ids().await?;
        info!(count = ids.len(), "stopping all deployments");
        for id in &ids {
            if let Err(e) = self.stop(id).await {
                error!(deployment_id = %id, error = %e, "stop failed during stop-all");
            }
        }
        if let Err(e) = self.reclaim_orphans(self.settings.delete_period).await {
            warn!(error = %e, "folder reclamation after stop-all failed");
        }
        self.active_ids().await
    }

    /// Restart `id` from its persisted manifest without re-rendering.
    pub async fn replay(&self, id: &str) -> EnvgridResult<DeploymentStarted> {
        let id = normalize_id(id)?;
        let live = self.runtime.status(&id).await.map_err(status_err)?;
        if !live.is_empty() {
            return Err(EnvgridError::ReplayStillActive(id));
        }

        let manifest = self
            .fs
            .read_manifest(&id, self.runtime.manifest_file_name())
            .await
            .map_err(|e| match e {
                StateError::NotFound(_) => EnvgridError::DeploymentNotFound(id.clone()),
                other => EnvgridError::start_failed(&id, "read persisted manifest", boxed(other)),
            })?;

        match self.launch(&id, &manifest).await {
            Ok(started) => {
                info!(deployment_id = %id, "deployment replayed");
                Ok(started)
            }
            Err(e) => {
                warn!(deployment_id = %id, error = %e, "deployment replay failed");
                // The persisted manifest stays so the replay can be retried.
                self.rollback(&id, false).await;
                Err(e)
            }
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Every active deployment with its metadata and resources.
    pub async fn list(&self) -> EnvgridResult<Vec<DeploymentInfo>> {
        let ids = self.active_ids().await?;
        let mut deployments = Vec::with_capacity(ids.len());
        for id in ids {
            let resources = self.runtime.status(&id).await.map_err(status_err)?;
            let metadata = match self.metadata.get(&id).await {
                Some(meta) => Some(meta),
                None => self.fs.read_metadata(&id).await.unwrap_or_else(|e| {
                    warn!(deployment_id = %id, error = %e, "unreadable metadata file");
                    None
                }),
            };
            let age_secs = self.age(&id).await.map(|age| age.as_secs());
            deployments.push(DeploymentInfo {
                id,
                metadata,
                resources,
                age_secs,
            });
        }
        Ok(deployments)
    }

    pub async fn logs(&self, id: &str) -> EnvgridResult<String> {
        let id = normalize_id(id)?;
        let manifest = self.existing_manifest(&id).await;
        if manifest.is_none() && self.runtime.status(&id).await.map_err(status_err)?.is_empty() {
            return Err(EnvgridError::DeploymentNotFound(id));
        }
        self.runtime
            .logs(&id, manifest.as_deref())
            .await
            .map_err(status_err)
    }

    /// Pack the deployment directory into a gzip tarball.
    pub async fn archive(&self, id: &str) -> EnvgridResult<PathBuf> {
        let id = normalize_id(id)?;
        let path = self.fs.archive(&id).await?;
        info!(deployment_id = %id, path = %path.display(), "deployment archived");
        Ok(path)
    }

    /// Live deployments this engine owns: runtime projects that have a
    /// directory under the deployments root.
    pub async fn active_ids(&self) -> EnvgridResult<Vec<DeploymentId>> {
        managed_ids(self.runtime.as_ref(), &self.fs).await
    }

    /// Lifecycle clock of `id`: its directory modification time.
    pub async fn created_at(&self, id: &str) -> EnvgridResult<Option<SystemTime>> {
        Ok(self.fs.modified_at(id).await?)
    }

    /// Time since `id` was created or last replayed. `None` without a directory.
    pub async fn age(&self, id: &str) -> Option<Duration> {
        match self.fs.age(id).await {
            Ok(age) => age,
            Err(e) => {
                warn!(deployment_id = %id, error = %e, "deployment age unavailable");
                None
            }
        }
    }

    /// Remove directories of inactive deployments older than `older_than`.
    pub async fn reclaim_orphans(&self, older_than: Duration) -> EnvgridResult<Vec<DeploymentId>> {
        let active: HashSet<DeploymentId> = self
            .runtime
            .active_ids()
            .await
            .map_err(status_err)?
            .into_iter()
            .collect();
        let mut reclaimed = Vec::new();
        for id in self.fs.list_ids().await? {
            if active.contains(&id) {
                continue;
            }
            let Some(age) = self.fs.age(&id).await? else {
                continue;
            };
            if age <= older_than {
                continue;
            }
            if self.fs.remove_dir(&id).await? {
                self.metadata.delete(&id).await;
                info!(deployment_id = %id, age_secs = age.as_secs(), "orphaned deployment directory reclaimed");
                reclaimed.push(id);
            }
        }
        Ok(reclaimed)
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn render_manifest(
        &self,
        id: &str,
        template: Option<&str>,
        variables: Option<&str>,
        overrides: &HashMap<String, String>,
    ) -> EnvgridResult<String> {
        let template = template.unwrap_or(&self.settings.default_template);
        let variables = variables.unwrap_or(&self.settings.default_variables);

        let source = self.renderer.template_source(template).await?;
        let file_vars = self.renderer.variables_file(variables).await?;
        let mut vars = merge_variables(&self.settings.process_variables, file_vars, overrides);
        inject_discovery(
            &mut vars,
            &source,
            id,
            overrides,
            self.settings.discovery_server.as_deref(),
        );

        let manifest = self.renderer.render_str(&source, &vars)?;
        debug!(deployment_id = %id, %template, %variables, bytes = manifest.len(), "manifest rendered");
        Ok(manifest)
    }

    /// Persist the manifest, bring the workload up, and verify it is live.
    async fn launch(&self, id: &str, manifest: &str) -> EnvgridResult<DeploymentStarted> {
        let path = self
            .fs
            .write_manifest(id, self.runtime.manifest_file_name(), manifest)
            .await
            .map_err(|e| EnvgridError::start_failed(id, "persist manifest", boxed(e)))?;

        self.runtime
            .up(id, &path)
            .await
            .map_err(|e| EnvgridError::start_failed(id, "workload start", boxed(e)))?;

        let resources = self
            .runtime
            .status(id)
            .await
            .map_err(|e| EnvgridError::start_failed(id, "verify workload", boxed(e)))?;
        if resources.is_empty() {
            return Err(EnvgridError::start_failed(
                id,
                "no live resources after start",
                None,
            ));
        }

        match self.active_ids().await {
            Ok(active) => {
                let pruned = self.metadata.prune_inactive(&active).await;
                if pruned > 0 {
                    debug!(pruned, "stale metadata pruned");
                }
            }
            Err(e) => warn!(error = %e, "skipping metadata prune, active ids unavailable"),
        }

        let metadata = metadata::extract(manifest);
        if let Some(meta) = &metadata {
            self.store_metadata(id, meta).await?;
        }

        Ok(DeploymentStarted {
            id: id.to_string(),
            resources,
            metadata,
        })
    }

    async fn store_metadata(&self, id: &str, meta: &Value) -> EnvgridResult<()> {
        if !self.metadata.set(id, meta.clone()).await {
            warn!(deployment_id = %id, "metadata not cached");
        }
        self.fs
            .write_metadata(id, meta)
            .await
            .map_err(|e| EnvgridError::start_failed(id, "persist metadata", boxed(e)))
    }

    /// Best-effort reverse of a failed start. Failures are logged only.
    async fn rollback(&self, id: &str, remove_dir: bool) {
        let manifest = self.existing_manifest(id).await;
        if let Err(e) = self.runtime.down(id, manifest.as_deref()).await {
            error!(deployment_id = %id, error = %e, "rollback: workload teardown failed");
        }
        self.metadata.delete(id).await;
        if remove_dir {
            if let Err(e) = self.fs.remove_dir(id).await {
                error!(deployment_id = %id, error = %e, "rollback: directory removal failed");
            }
        }
        debug!(deployment_id = %id, "deployment rolled back");
    }

    async fn existing_manifest(&self, id: &str) -> Option<PathBuf> {
        let path = self.fs.manifest_path(id, self.runtime.manifest_file_name());
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }
}
