//! Job runner adapter: the seam between the engine and the playbook backend
//!
//! The engine only depends on [`JobRunner`] and [`JobHandle`]. A launch must
//! return promptly; the engine polls liveness instead of blocking on the job.
//! [`ProcessRunner`] is the shipped implementation spawning one
//! `ansible-playbook` process per node with its stdout captured under the
//! artifact directory.

use crate::error::{Result, WorkflowError};
use crate::node::PlaybookSpec;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Final result of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Ok,
    Failed,
    /// The backend rejected the invocation parameters before running anything
    WrongParameter,
}

/// `ansible-playbook` exits with this code on bad or incomplete options.
const WRONG_PARAMETER_EXIT: i32 = 5;

/// Everything a single launch needs.
#[derive(Debug, Clone)]
pub struct LaunchSpec<'a> {
    pub spec: &'a PlaybookSpec,
    /// Workflow artifact directory; the job writes under `<ident>/`
    pub artifact_dir: &'a Path,
    /// Unique on-disk name for this launch
    pub ident: &'a str,
}

/// Handle to one asynchronous job.
pub trait JobHandle: Send + Sync {
    /// True while the job process is still running.
    fn is_alive(&self) -> bool;

    /// Final outcome; only defined once `is_alive` returns false.
    fn final_status(&self) -> JobOutcome;

    /// Best-effort termination for hard stop. Default: unsupported.
    fn terminate(&self) -> bool {
        false
    }
}

/// Abstract playbook execution backend.
pub trait JobRunner: Send + Sync {
    /// Spawn a job for `launch`; must not block on the job itself.
    fn launch(&self, launch: &LaunchSpec<'_>) -> Result<Box<dyn JobHandle>>;
}

/// Path of the raw stdout file for a given launch ident.
pub fn stdout_path(artifact_dir: &Path, ident: &str) -> PathBuf {
    artifact_dir.join(ident).join("stdout")
}

/// Pick the on-disk ident for a launch of `node_id`.
///
/// The node id is used as-is the first time; retries take the first free
/// `<id>_1, <id>_2, …` so earlier logs survive.
pub fn next_free_ident(artifact_dir: &Path, node_id: &str) -> String {
    if !artifact_dir.join(node_id).exists() {
        return node_id.to_string();
    }
    let mut attempt = 1usize;
    loop {
        let candidate = format!("{}_{}", node_id, attempt);
        if !artifact_dir.join(&candidate).exists() {
            return candidate;
        }
        attempt += 1;
    }
}

/// Runs playbooks by spawning an external interpreter process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Program invoked per job, `ansible-playbook` unless overridden
    program: String,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            program: "ansible-playbook".to_string(),
        }
    }

    /// Override the spawned program, used by integration tests.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn build_command(&self, launch: &LaunchSpec<'_>) -> Result<Command> {
        let spec = launch.spec;
        let mut command = Command::new(&self.program);
        command.arg(&spec.playbook);
        command.arg("-i").arg(&spec.inventory);
        for (key, value) in &spec.extra_vars {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            command.arg("-e").arg(format!("{}={}", key, rendered));
        }
        for vault_id in &spec.vault_ids {
            command.arg("--vault-id").arg(vault_id);
        }
        if spec.check_mode {
            command.arg("--check");
        }
        if spec.diff_mode {
            command.arg("--diff");
        }
        if spec.verbosity > 0 {
            command.arg(format!("-{}", "v".repeat(spec.verbosity as usize)));
        }
        if let Some(limit) = &spec.limit {
            command.arg("--limit").arg(limit);
        }
        if let Some(project) = &spec.project_path {
            command.current_dir(project);
        }
        Ok(command)
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRunner for ProcessRunner {
    fn launch(&self, launch: &LaunchSpec<'_>) -> Result<Box<dyn JobHandle>> {
        let job_dir = launch.artifact_dir.join(launch.ident);
        fs::create_dir_all(&job_dir)?;
        let stdout_file = fs::File::create(stdout_path(launch.artifact_dir, launch.ident))?;
        let stderr_file = stdout_file.try_clone()?;

        let mut command = self.build_command(launch)?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));

        debug!(ident = launch.ident, program = %self.program, "spawning playbook job");
        let child = command.spawn().map_err(|e| WorkflowError::Launch {
            node: launch.ident.to_string(),
            reason: e.to_string(),
        })?;
        info!(ident = launch.ident, pid = child.id(), "job started");

        Ok(Box::new(ProcessHandle {
            child: Mutex::new(child),
            exit: Mutex::new(None),
        }))
    }
}

/// Handle over a spawned child process; liveness is a non-blocking wait.
struct ProcessHandle {
    child: Mutex<Child>,
    exit: Mutex<Option<JobOutcome>>,
}

impl ProcessHandle {
    fn poll(&self) -> Option<JobOutcome> {
        if let Some(outcome) = *self.exit.lock() {
            return Some(outcome);
        }
        let mut child = self.child.lock();
        match child.try_wait() {
            Ok(Some(status)) => {
                let outcome = if status.success() {
                    JobOutcome::Ok
                } else if status.code() == Some(WRONG_PARAMETER_EXIT) {
                    JobOutcome::WrongParameter
                } else {
                    JobOutcome::Failed
                };
                *self.exit.lock() = Some(outcome);
                Some(outcome)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to poll job process, treating as failed");
                *self.exit.lock() = Some(JobOutcome::Failed);
                Some(JobOutcome::Failed)
            }
        }
    }
}

impl JobHandle for ProcessHandle {
    fn is_alive(&self) -> bool {
        self.poll().is_none()
    }

    fn final_status(&self) -> JobOutcome {
        self.poll().unwrap_or(JobOutcome::Failed)
    }

    fn terminate(&self) -> bool {
        let mut child = self.child.lock();
        match child.kill() {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "kill failed, job probably already finished");
                false
            }
        }
    }
}
