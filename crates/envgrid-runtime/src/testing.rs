//! In-memory stand-in for docker and kubectl.
//!
//! `FakeEngine` implements [`ProcessRunner`] by interpreting the command
//! lines the runtimes emit and keeping a set of live projects, so the
//! deployment engine can be exercised without a container engine. Docker
//! projects whose containers have exited are kept apart and only show up
//! in `docker ps -a`.

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::process::{ProcessOutput, ProcessRunner};

#[derive(Default)]
struct Inner {
    unavailable: bool,
    hollow_up: bool,
    crash_on_up: bool,
    projects: BTreeSet<String>,
    exited: BTreeSet<String>,
    failures: Vec<String>,
    calls: Vec<String>,
    memory: Vec<f64>,
    networks: Vec<String>,
    attachments: HashSet<(String, String)>,
}

/// Scriptable fake container engine.
#[derive(Default)]
pub struct FakeEngine {
    inner: Mutex<Inner>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    /// Make every command fail as if the daemon were unreachable.
    pub fn set_available(&self, available: bool) {
        self.with(|i| i.unavailable = !available);
    }

    /// Make `up` report success without creating any resources.
    pub fn set_hollow_up(&self, hollow: bool) {
        self.with(|i| i.hollow_up = hollow);
    }

    /// Make every container exit right after `compose up`.
    pub fn set_crash_on_up(&self, crash: bool) {
        self.with(|i| i.crash_on_up = crash);
    }

    /// Fail every command line containing `pattern`.
    pub fn fail_matching(&self, pattern: &str) {
        self.with(|i| i.failures.push(pattern.to_string()));
    }

    pub fn clear_failures(&self) {
        self.with(|i| i.failures.clear());
    }

    /// Per-container (docker) or per-node (kubectl) memory percentages.
    pub fn set_memory(&self, values: &[f64]) {
        self.with(|i| i.memory = values.to_vec());
    }

    pub fn add_network(&self, name: &str) {
        self.with(|i| i.networks.push(name.to_string()));
    }

    /// Register a live project without going through `up`.
    pub fn add_project(&self, id: &str) {
        self.with(|i| {
            i.projects.insert(id.to_string());
        });
    }

    pub fn remove_project(&self, id: &str) {
        self.with(|i| {
            i.projects.remove(id);
        });
    }

    /// Stop the containers of a live project, leaving them in exited state.
    pub fn crash_project(&self, id: &str) {
        self.with(|i| {
            if i.projects.remove(id) {
                i.exited.insert(id.to_string());
            }
        });
    }

    pub fn exited_projects(&self) -> Vec<String> {
        self.with(|i| i.exited.iter().cloned().collect())
    }

    pub fn projects(&self) -> Vec<String> {
        self.with(|i| i.projects.iter().cloned().collect())
    }

    pub fn is_attached(&self, network: &str, container: &str) -> bool {
        self.with(|i| {
            i.attachments
                .contains(&(network.to_string(), container.to_string()))
        })
    }

    /// Every command line seen so far, space-joined.
    pub fn calls(&self) -> Vec<String> {
        self.with(|i| i.calls.clone())
    }

    pub fn calls_matching(&self, pattern: &str) -> usize {
        self.with(|i| i.calls.iter().filter(|c| c.contains(pattern)).count())
    }

    fn respond(&self, argv: &[String]) -> ProcessOutput {
        let line = argv.join(" ");
        self.with(|inner| {
            inner.calls.push(line.clone());
            if inner.unavailable {
                return ProcessOutput::failed(
                    1,
                    "Cannot connect to the Docker daemon. Is the docker daemon running?",
                );
            }
            if inner.failures.iter().any(|p| line.contains(p.as_str())) {
                return ProcessOutput::failed(1, format!("scripted failure: {line}"));
            }
            let args: Vec<&str> = argv.iter().map(String::as_str).collect();
            match args.as_slice() {
                ["docker", "info", ..] => ProcessOutput::ok("24.0.7\n"),
                ["docker", "compose", rest @ ..] => compose(inner, rest),
                ["docker", "ps", rest @ ..] => ps(inner, rest),
                ["docker", "stats", ..] => ProcessOutput::ok(
                    inner
                        .memory
                        .iter()
                        .map(|m| format!("{m}%\n"))
                        .collect::<String>(),
                ),
                ["docker", "network", "ls", .., filter, _, _] if filter.starts_with("name=") => {
                    let fragment = filter.trim_start_matches("name=");
                    let matching: BTreeSet<String> = inner
                        .networks
                        .iter()
                        .filter(|n| n.contains(fragment))
                        .cloned()
                        .collect();
                    ProcessOutput::ok(lines(&matching))
                }
                ["docker", "network", "connect", network, container] => {
                    let key = (network.to_string(), container.to_string());
                    if !inner.networks.iter().any(|n| n == network) {
                        ProcessOutput::failed(
                            1,
                            format!("Error response from daemon: network {network} not found"),
                        )
                    } else if inner.attachments.contains(&key) {
                        ProcessOutput::failed(
                            1,
                            format!(
                                "Error response from daemon: endpoint with name {container} already exists in network {network}"
                            ),
                        )
                    } else {
                        inner.attachments.insert(key);
                        ProcessOutput::ok("")
                    }
                }
                ["docker", "network", "disconnect", network, container] => {
                    let key = (network.to_string(), container.to_string());
                    if inner.attachments.remove(&key) {
                        ProcessOutput::ok("")
                    } else {
                        ProcessOutput::failed(
                            1,
                            format!(
                                "Error response from daemon: container {container} is not connected to network {network}"
                            ),
                        )
                    }
                }
                ["kubectl", "get", "--raw", ..] => ProcessOutput::ok("ok"),
                ["kubectl", "create", "namespace", id] => {
                    if inner.projects.contains(*id) {
                        ProcessOutput::failed(
                            1,
                            format!("Error from server (AlreadyExists): namespaces \"{id}\" already exists"),
                        )
                    } else {
                        if !inner.hollow_up {
                            inner.projects.insert(id.to_string());
                        }
                        ProcessOutput::ok(format!("namespace/{id} created\n"))
                    }
                }
                ["kubectl", "delete", "namespace", id, ..] => {
                    inner.projects.remove(*id);
                    ProcessOutput::ok("")
                }
                ["kubectl", "get", "pods", "-n", id, ..] => {
                    if inner.projects.contains(*id) {
                        ProcessOutput::ok(format!("uid-{id} {id}-app-0 Running busybox:1.36\n"))
                    } else {
                        ProcessOutput::ok("")
                    }
                }
                ["kubectl", "get", "namespaces", ..] => ProcessOutput::ok(lines(&inner.projects)),
                ["kubectl", "top", "nodes", ..] => ProcessOutput::ok(
                    inner
                        .memory
                        .iter()
                        .enumerate()
                        .map(|(n, m)| format!("node-{n} 100m 5% 512Mi {m}%\n"))
                        .collect::<String>(),
                ),
                ["kubectl", "logs", ..] => ProcessOutput::ok("hello from pod\n"),
                ["sh", "-c", command] => shell(command),
                _ => ProcessOutput::ok(""),
            }
        })
    }
}

fn lines(set: &BTreeSet<String>) -> String {
    set.iter().map(|s| format!("{s}\n")).collect()
}

/// `docker ps [-a] --filter label=...=<id> --format ...` or
/// `docker ps [-a] --format <project label>`.
fn ps(inner: &Inner, args: &[&str]) -> ProcessOutput {
    let (all, args) = match args {
        ["-a", rest @ ..] => (true, rest),
        rest => (false, rest),
    };
    match args {
        ["--filter", filter, ..] => {
            let id = filter.rsplit('=').next().unwrap_or_default();
            if inner.projects.contains(id) {
                ProcessOutput::ok(format!("c0ffee;{id}_app_1;Up 1 second;busybox:1.36\n"))
            } else if all && inner.exited.contains(id) {
                ProcessOutput::ok(format!(
                    "c0ffee;{id}_app_1;Exited (1) 2 seconds ago;busybox:1.36\n"
                ))
            } else {
                ProcessOutput::ok("")
            }
        }
        ["--format", ..] if all => {
            let every: BTreeSet<String> = inner.projects.union(&inner.exited).cloned().collect();
            ProcessOutput::ok(lines(&every))
        }
        ["--format", ..] => ProcessOutput::ok(lines(&inner.projects)),
        _ => ProcessOutput::ok(""),
    }
}

fn compose(inner: &mut Inner, args: &[&str]) -> ProcessOutput {
    let Some(pos) = args.iter().position(|a| *a == "-p") else {
        return ProcessOutput::failed(1, "no project name");
    };
    let Some(id) = args.get(pos + 1) else {
        return ProcessOutput::failed(1, "no project name");
    };
    match args.get(pos + 2) {
        Some(&"up") => {
            inner.exited.remove(*id);
            if inner.crash_on_up {
                inner.exited.insert(id.to_string());
            } else if !inner.hollow_up {
                inner.projects.insert(id.to_string());
            }
            ProcessOutput::ok("")
        }
        Some(&"down") => {
            inner.projects.remove(*id);
            inner.exited.remove(*id);
            ProcessOutput::ok("")
        }
        Some(&"logs") => ProcessOutput::ok(format!("{id}_app_1  | hello\n")),
        _ => ProcessOutput::ok(""),
    }
}

/// Tiny subset of `sh -c`: `echo ...` and `exit N`.
fn shell(command: &str) -> ProcessOutput {
    if let Some(text) = command.strip_prefix("echo ") {
        ProcessOutput::ok(format!("{text}\n"))
    } else if let Some(code) = command.strip_prefix("exit ") {
        ProcessOutput::failed(code.trim().parse().unwrap_or(1), "")
    } else {
        ProcessOutput::ok("")
    }
}

#[async_trait]
impl ProcessRunner for FakeEngine {
    async fn run(&self, argv: &[String]) -> Result<ProcessOutput, ProcessError> {
        if argv.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }
        let mut out = self.respond(argv);
        out.pid = Some(4242);
        Ok(out)
    }

    async fn spawn_detached(&self, command: &str) -> Result<u32, ProcessError> {
        self.with(|i| i.calls.push(format!("detached: {command}")));
        Ok(4242)
    }
}
