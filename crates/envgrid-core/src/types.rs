//! Domain types for deployments and their live resources.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EnvgridError, EnvgridResult};

/// Normalized (lower-case) deployment identifier.
pub type DeploymentId = String;

/// Longest id accepted; ids double as directory names and compose project names.
pub const MAX_ID_LEN: usize = 63;

/// Lower-case a caller-supplied id and check that it is usable as a
/// directory name and runtime resource filter.
pub fn normalize_id(raw: &str) -> EnvgridResult<DeploymentId> {
    let id = raw.trim().to_lowercase();
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if !valid {
        return Err(EnvgridError::InvalidDeploymentId(raw.to_string()));
    }
    Ok(id)
}

/// Generate a random 32-character hex deployment id.
pub fn generate_id() -> EnvgridResult<DeploymentId> {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf)
        .map_err(|e| EnvgridError::Io(std::io::Error::other(e.to_string())))?;
    Ok(hex::encode(buf))
}

/// Which workload runtime backs deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Docker,
    Kubectl,
}

/// One live runtime resource (container or pod) belonging to a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Runtime-assigned identifier (container id or pod uid).
    pub id: String,
    /// Resource name, e.g. `abc123_api_1` or `api-7f9c-xk2`.
    pub name: String,
    /// Runtime status text, e.g. `Up 3 minutes` or `Running`.
    pub status: String,
    /// Image the resource runs, when the runtime reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Where the manifest for a new deployment comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestSource {
    /// Render a template from the templates directory. `None` fields fall
    /// back to the configured defaults.
    Template {
        template: Option<String>,
        variables: Option<String>,
    },
    /// Caller-supplied manifest text, persisted as-is.
    Raw(String),
}

/// A request to bring up a new deployment.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub source: ManifestSource,
    /// Per-request template variables.
    pub overrides: HashMap<String, String>,
    /// Caller-supplied id; a random one is generated when absent.
    pub requested_id: Option<String>,
}

/// Outcome of a successful start.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStarted {
    pub id: DeploymentId,
    pub resources: Vec<ResourceDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Summary of one active deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentInfo {
    pub id: DeploymentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub resources: Vec<ResourceDescriptor>,
    /// Seconds since the deployment directory was last written, if it exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_secs: Option<u64>,
}
