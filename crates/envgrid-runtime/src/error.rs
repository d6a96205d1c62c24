//! Process and runtime error types.

use thiserror::Error;

/// Failures launching or waiting on an external process.
///
/// A nonzero exit is not a `ProcessError`; it is reported through
/// [`crate::ProcessOutput::code`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting on `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from workload runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("`{command}` exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("unexpected runtime output: {0}")]
    Parse(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
