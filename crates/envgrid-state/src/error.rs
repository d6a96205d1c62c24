//! Error types for the envgrid state stores.

use std::path::PathBuf;

use envgrid_core::EnvgridError;
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("deployment directory for {0} already exists")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("archive error: {0}")]
    Archive(String),
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StateError {
        let path = path.into();
        move |source| StateError::Io { path, source }
    }
}

impl From<StateError> for EnvgridError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Conflict(id) => EnvgridError::DeploymentConflict(id),
            StateError::NotFound(id) => EnvgridError::DeploymentNotFound(id),
            StateError::Io { source, .. } => EnvgridError::Io(source),
            other => EnvgridError::Io(std::io::Error::other(other.to_string())),
        }
    }
}
