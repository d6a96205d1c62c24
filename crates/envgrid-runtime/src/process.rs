//! External process execution.
//!
//! `ProcessRunner` is the only way envgrid starts external programs.
//! Exit codes are captured and returned, never turned into panics.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ProcessError;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub pid: Option<u32>,
}

impl ProcessOutput {
    /// A successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            code: Some(0),
            ..Default::default()
        }
    }

    /// A failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            code: Some(code),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code with signal deaths reported as -1.
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(-1)
    }
}

/// Runs external commands.
#[async_trait]
pub trait ProcessRunner: Send + Sync + 'static {
    /// Run `argv[0]` with the remaining arguments and wait for it to exit.
    async fn run(&self, argv: &[String]) -> Result<ProcessOutput, ProcessError>;

    /// Run a shell command line through `sh -c` and wait for it to exit.
    async fn run_shell(&self, command: &str) -> Result<ProcessOutput, ProcessError> {
        self.run(&argv(["sh", "-c", command])).await
    }

    /// Start a shell command line in the background and return its pid.
    async fn spawn_detached(&self, command: &str) -> Result<u32, ProcessError>;
}

/// Build an owned argv from string slices.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts.into_iter().map(|p| p.as_ref().to_string()).collect()
}

/// Render an argv for log lines and error messages.
pub fn display_command(argv: &[String]) -> String {
    argv.join(" ")
}

/// `ProcessRunner` backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, argv: &[String]) -> Result<ProcessOutput, ProcessError> {
        let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;
        let pid = child.id();

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ProcessError::Wait {
                program: program.clone(),
                source,
            })?;

        let result = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
            pid,
        };
        debug!(
            command = %display_command(argv),
            code = ?result.code,
            "process finished"
        );
        Ok(result)
    }

    async fn spawn_detached(&self, command: &str) -> Result<u32, ProcessError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: "sh".to_string(),
                source,
            })?;
        let pid = child.id().unwrap_or_default();

        // Reap the child so it does not linger as a zombie.
        let command = command.to_string();
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!(%command, error = %e, "detached process wait failed");
            }
        });

        debug!(pid, "detached process started");
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout_and_code() {
        let runner = TokioProcessRunner::new();
        let out = runner.run(&argv(["echo", "hello"])).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.pid.is_some());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let runner = TokioProcessRunner::new();
        let out = runner.run_shell("echo boom >&2; exit 3").await.unwrap();
        assert!(!out.success());
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let runner = TokioProcessRunner::new();
        let err = runner
            .run(&argv(["envgrid-definitely-not-a-binary"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        let runner = TokioProcessRunner::new();
        let err = runner.run(&[]).await.unwrap_err();
        assert!(matches!(err, ProcessError::EmptyCommand));
    }

    #[tokio::test]
    async fn spawn_detached_returns_pid() {
        let runner = TokioProcessRunner::new();
        let pid = runner.spawn_detached("sleep 0").await.unwrap();
        assert!(pid > 0);
    }

    #[test]
    fn output_helpers() {
        assert!(ProcessOutput::ok("x").success());
        let failed = ProcessOutput::failed(2, "nope");
        assert!(!failed.success());
        assert_eq!(failed.exit_code(), 2);
        assert_eq!(ProcessOutput::default().exit_code(), -1);
    }
}
