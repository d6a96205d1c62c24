//! Error taxonomy shared by every envgrid component.
//!
//! Errors cross component boundaries as an `EnvgridError`: a kind, a
//! human-readable message, and an optional root cause reachable through
//! `std::error::Error::source`.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Boxed root cause carried by some variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for envgrid operations.
pub type EnvgridResult<T> = Result<T, EnvgridError>;

/// Why the admission controller refused a new deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// The container engine or cluster API did not answer the liveness probe.
    RuntimeUnavailable,
    /// Aggregate memory usage is at or above the configured ceiling.
    ResourcePressure { measured: f64, ceiling: f64 },
    /// The number of active deployments reached the configured maximum.
    CapacityReached { max: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::RuntimeUnavailable => write!(f, "runtime unavailable"),
            Rejection::ResourcePressure { measured, ceiling } => {
                write!(f, "memory usage {measured:.1}% exceeds ceiling {ceiling:.1}%")
            }
            Rejection::CapacityReached { max } => {
                write!(f, "maximum of {max} active deployments reached")
            }
        }
    }
}

/// Stable, serializable classification of an [`EnvgridError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    AdmissionRejected,
    RenderFailure,
    DeployStartFailure,
    DeployStopFailure,
    DeployStatusFailure,
    ReplayStillActive,
    DeploymentConflict,
    DeploymentNotFound,
    InvalidDeploymentId,
    NetworkResolutionFailure,
    NetworkConnectFailure,
    NetworkDisconnectFailure,
    ContainerUnreachable,
    CommandNotAllowed,
    CommandExecFailure,
    CommandRunNotFound,
    CommandRunLimit,
    MissingParameter,
    EmptyBody,
    Io,
}

/// Errors surfaced by the deployment lifecycle engine.
#[derive(Debug, Error)]
pub enum EnvgridError {
    #[error("admission rejected: {0}")]
    AdmissionRejected(Rejection),

    #[error("render failed: {message}")]
    RenderFailure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("failed to start deployment {id}: {message}")]
    DeployStartFailure {
        id: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("failed to stop deployment {id}: {message}")]
    DeployStopFailure {
        id: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("failed to query deployment status: {message}")]
    DeployStatusFailure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("deployment {0} still has live resources")]
    ReplayStillActive(String),

    #[error("deployment {0} already exists")]
    DeploymentConflict(String),

    #[error("deployment {0} not found")]
    DeploymentNotFound(String),

    #[error("invalid deployment id {0:?}")]
    InvalidDeploymentId(String),

    #[error("could not resolve control-plane network: {0}")]
    NetworkResolutionFailure(String),

    #[error("network connect failed: {0}")]
    NetworkConnectFailure(String),

    #[error("network disconnect failed: {0}")]
    NetworkDisconnectFailure(String),

    #[error("container at {address} unreachable: {message}")]
    ContainerUnreachable { address: String, message: String },

    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("command execution failed: {message}")]
    CommandExecFailure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("command run {0} not found")]
    CommandRunNotFound(String),

    #[error("{max} background command runs are still in progress")]
    CommandRunLimit { max: usize },

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("request body is empty")]
    EmptyBody,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvgridError {
    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnvgridError::AdmissionRejected(_) => ErrorKind::AdmissionRejected,
            EnvgridError::RenderFailure { .. } => ErrorKind::RenderFailure,
            EnvgridError::DeployStartFailure { .. } => ErrorKind::DeployStartFailure,
            EnvgridError::DeployStopFailure { .. } => ErrorKind::DeployStopFailure,
            EnvgridError::DeployStatusFailure { .. } => ErrorKind::DeployStatusFailure,
            EnvgridError::ReplayStillActive(_) => ErrorKind::ReplayStillActive,
            EnvgridError::DeploymentConflict(_) => ErrorKind::DeploymentConflict,
            EnvgridError::DeploymentNotFound(_) => ErrorKind::DeploymentNotFound,
            EnvgridError::InvalidDeploymentId(_) => ErrorKind::InvalidDeploymentId,
            EnvgridError::NetworkResolutionFailure(_) => ErrorKind::NetworkResolutionFailure,
            EnvgridError::NetworkConnectFailure(_) => ErrorKind::NetworkConnectFailure,
            EnvgridError::NetworkDisconnectFailure(_) => ErrorKind::NetworkDisconnectFailure,
            EnvgridError::ContainerUnreachable { .. } => ErrorKind::ContainerUnreachable,
            EnvgridError::CommandNotAllowed(_) => ErrorKind::CommandNotAllowed,
            EnvgridError::CommandExecFailure { .. } => ErrorKind::CommandExecFailure,
            EnvgridError::CommandRunNotFound(_) => ErrorKind::CommandRunNotFound,
            EnvgridError::CommandRunLimit { .. } => ErrorKind::CommandRunLimit,
            EnvgridError::MissingParameter(_) => ErrorKind::MissingParameter,
            EnvgridError::EmptyBody => ErrorKind::EmptyBody,
            EnvgridError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn render(message: impl Into<String>) -> Self {
        EnvgridError::RenderFailure {
            message: message.into(),
            source: None,
        }
    }

    pub fn start_failed(
        id: &str,
        message: impl Into<String>,
        source: Option<BoxError>,
    ) -> Self {
        EnvgridError::DeployStartFailure {
            id: id.to_string(),
            message: message.into(),
            source,
        }
    }

    pub fn stop_failed(
        id: &str,
        message: impl Into<String>,
        source: Option<BoxError>,
    ) -> Self {
        EnvgridError::DeployStopFailure {
            id: id.to_string(),
            message: message.into(),
            source,
        }
    }

    pub fn status_failed(message: impl Into<String>, source: Option<BoxError>) -> Self {
        EnvgridError::DeployStatusFailure {
            message: message.into(),
            source,
        }
    }

    pub fn exec_failed(message: impl Into<String>, source: Option<BoxError>) -> Self {
        EnvgridError::CommandExecFailure {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = EnvgridError::AdmissionRejected(Rejection::CapacityReached { max: 3 });
        assert_eq!(err.kind(), ErrorKind::AdmissionRejected);
        assert_eq!(
            err.to_string(),
            "admission rejected: maximum of 3 active deployments reached"
        );
    }

    #[test]
    fn root_cause_is_exposed_as_source() {
        let cause = std::io::Error::other("disk full");
        let err = EnvgridError::start_failed("abc", "persist manifest", Some(Box::new(cause) as BoxError));
        assert_eq!(err.kind(), ErrorKind::DeployStartFailure);
        assert_eq!(err.source().map(|s| s.to_string()), Some("disk full".to_string()));
    }

    #[test]
    fn missing_source_is_none() {
        let err = EnvgridError::stop_failed("abc", "exit status 1", None);
        assert!(err.source().is_none());
    }

    #[test]
    fn rejection_serializes_with_reason_tag() {
        let json = serde_json::to_value(Rejection::ResourcePressure {
            measured: 91.5,
            ceiling: 80.0,
        })
        .unwrap();
        assert_eq!(json["reason"], "resource_pressure");
        assert_eq!(json["measured"], 91.5);
    }
}
