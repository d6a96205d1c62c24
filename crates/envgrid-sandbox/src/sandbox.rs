//! CommandSandbox — sequential execution behind a destructive-word screen.
//!
//! Runs are either awaited in full ([`CommandSandbox::run`]) or started in
//! the background ([`CommandSandbox::spawn`]) and polled by run id. The
//! sandbox keeps at most `capacity` background runs; finished ones are
//! evicted oldest first to make room.

use std::sync::{Arc, LazyLock};

use envgrid_core::{EnvgridError, EnvgridResult, generate_id};
use envgrid_runtime::{ProcessError, ProcessRunner};
use regex::Regex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::record::{CommandDetails, CommandRunRecord};

/// Background runs kept when no capacity is given.
pub const DEFAULT_RUNS_CAPACITY: usize = 64;

static DESTRUCTIVE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(rm|rmdir|unlink|shred)\b").ok());

/// Return the first command containing a destructive word.
///
/// If the screen itself is unavailable every command counts as
/// destructive, so the first one is returned.
pub fn screen<S: AsRef<str>>(commands: &[S]) -> Option<&str> {
    screen_with(DESTRUCTIVE.as_ref(), commands)
}

fn screen_with<'a, S: AsRef<str>>(re: Option<&Regex>, commands: &'a [S]) -> Option<&'a str> {
    let mut commands = commands.iter().map(|c| c.as_ref());
    match re {
        Some(re) => commands.find(|c| re.is_match(c)),
        None => {
            error!("destructive command screen unavailable, refusing every command");
            commands.next()
        }
    }
}

fn check<S: AsRef<str>>(commands: &[S]) -> EnvgridResult<()> {
    check_with(DESTRUCTIVE.as_ref(), commands)
}

fn check_with<S: AsRef<str>>(re: Option<&Regex>, commands: &[S]) -> EnvgridResult<()> {
    if commands.is_empty() {
        return Err(EnvgridError::MissingParameter("commands".to_string()));
    }
    if let Some(offending) = screen_with(re, commands) {
        warn!(command = %offending, "rejected destructive command");
        return Err(EnvgridError::CommandNotAllowed(offending.to_string()));
    }
    Ok(())
}

pub struct CommandSandbox<P: ProcessRunner> {
    runner: Arc<P>,
    runs: Arc<RwLock<Vec<(String, SandboxHandle)>>>,
    capacity: usize,
}

impl<P: ProcessRunner> Clone for CommandSandbox<P> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            runs: self.runs.clone(),
            capacity: self.capacity,
        }
    }
}

impl<P: ProcessRunner> CommandSandbox<P> {
    pub fn new(runner: Arc<P>) -> Self {
        Self::with_capacity(runner, DEFAULT_RUNS_CAPACITY)
    }

    pub fn with_capacity(runner: Arc<P>, capacity: usize) -> Self {
        Self {
            runner,
            runs: Arc::new(RwLock::new(Vec::new())),
            capacity,
        }
    }

    /// Run `commands` in order and return the finished record.
    ///
    /// Fails before running anything if the list is empty or any command
    /// is destructive. A command that cannot be started at all aborts the
    /// run with `CommandExecFailure`.
    pub async fn run(&self, commands: Vec<String>) -> EnvgridResult<CommandRunRecord> {
        check(commands.as_slice())?;
        let record = Arc::new(RwLock::new(CommandRunRecord::scheduled(commands.as_slice())));
        execute(self.runner.as_ref(), &record, &commands)
            .await
            .map_err(|e| EnvgridError::exec_failed(e.to_string(), Some(Box::new(e))))?;
        Ok(record.read().await.clone())
    }

    /// Like [`CommandSandbox::run`], in a background task. Returns the run
    /// id to poll with [`CommandSandbox::record`].
    ///
    /// Fails with `CommandRunLimit` when `capacity` runs are kept and none
    /// of them has finished.
    pub async fn spawn(&self, commands: Vec<String>) -> EnvgridResult<String> {
        check(commands.as_slice())?;

        let mut runs = self.runs.write().await;
        if runs.len() >= self.capacity {
            match runs.iter().position(|(_, run)| run.is_finished()) {
                Some(oldest) => {
                    let (evicted, _) = runs.remove(oldest);
                    debug!(run_id = %evicted, "finished command run evicted");
                }
                None => {
                    warn!(capacity = self.capacity, "background command run refused");
                    return Err(EnvgridError::CommandRunLimit { max: self.capacity });
                }
            }
        }

        let record = Arc::new(RwLock::new(CommandRunRecord::scheduled(commands.as_slice())));
        let runner = self.runner.clone();
        let shared = record.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = execute(runner.as_ref(), &shared, &commands).await {
                error!(error = %e, "background command run aborted");
            }
        });

        let run_id = generate_id()?;
        info!(run_id = %run_id, "background command run started");
        runs.push((run_id.clone(), SandboxHandle { record, handle }));
        Ok(run_id)
    }

    /// Current record of a background run.
    pub async fn record(&self, run_id: &str) -> EnvgridResult<CommandRunRecord> {
        let runs = self.runs.read().await;
        match runs.iter().find(|(id, _)| id == run_id) {
            Some((_, run)) => Ok(run.snapshot().await),
            None => Err(EnvgridError::CommandRunNotFound(run_id.to_string())),
        }
    }

    /// Start one command detached from envgrid and return its pid. Nothing
    /// about it is recorded after it starts.
    pub async fn launch(&self, command: &str) -> EnvgridResult<u32> {
        if command.trim().is_empty() {
            return Err(EnvgridError::MissingParameter("command".to_string()));
        }
        check(&[command])?;
        let pid = self
            .runner
            .spawn_detached(command)
            .await
            .map_err(|e| EnvgridError::exec_failed(e.to_string(), Some(Box::new(e))))?;
        info!(pid, %command, "detached command launched");
        Ok(pid)
    }
}

/// A background run and the record it fills in.
struct SandboxHandle {
    record: Arc<RwLock<CommandRunRecord>>,
    handle: JoinHandle<()>,
}

impl SandboxHandle {
    async fn snapshot(&self) -> CommandRunRecord {
        self.record.read().await.clone()
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn execute<P: ProcessRunner + ?Sized>(
    runner: &P,
    record: &RwLock<CommandRunRecord>,
    commands: &[String],
) -> Result<(), ProcessError> {
    record.write().await.begin();
    info!(count = commands.len(), "command run started");

    for command in commands {
        record.write().await.begin_command(command);
        let result = runner.run_shell(command).await;

        let mut guard = record.write().await;
        match result {
            Ok(out) => {
                debug!(%command, code = out.exit_code(), "command finished");
                guard.finish_command(
                    command,
                    CommandDetails {
                        code: out.code,
                        out: out.stdout,
                        err: out.stderr,
                        pid: out.pid,
                    },
                );
            }
            Err(e) => {
                guard.finish_command(
                    command,
                    CommandDetails {
                        err: e.to_string(),
                        ..Default::default()
                    },
                );
                guard.finish();
                return Err(e);
            }
        }
    }

    let mut guard = record.write().await;
    guard.finish();
    info!(
        count = commands.len(),
        duration_secs = guard.duration_secs.unwrap_or_default(),
        "command run finished"
    );
    Ok(())
}
