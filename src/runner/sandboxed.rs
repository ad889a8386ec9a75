//! Sandboxed runner implementation using a supervised child process
//!
//! Each run gets a fresh interpreter process in its own process group, with
//! stdin closed and stdout/stderr piped. A watchdog bounds the wall-clock
//! time; when it fires the whole group is killed and the child is reaped.

use anyhow::Context;
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{ExecutionOutcome, ResourceLimits, RunStatus, Sandbox};
use crate::artifact::ScratchArtifact;
use crate::error::{Result, ServiceError};

/// Runner that executes each script in its own interpreter process
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    /// Interpreter program path or name
    interpreter: PathBuf,
    /// Arguments placed before the script path
    args: Vec<String>,
    limits: ResourceLimits,
}

impl ProcessSandbox {
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args: Vec::new(),
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Run `<interpreter> --version` once, failing if it cannot be executed
    pub async fn probe(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.interpreter)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to run {:?} --version", self.interpreter))?;

        if !output.status.success() {
            anyhow::bail!(
                "Interpreter {:?} exited with {} during probe",
                self.interpreter,
                output.status
            );
        }

        // Older interpreters print their version on stderr.
        let version = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr)
        } else {
            String::from_utf8_lossy(&output.stdout)
        };
        Ok(version.trim().to_string())
    }

    /// Run a script file to a terminal state within `timeout`
    pub async fn execute(&self, script: &Path, timeout: Duration) -> Result<ExecutionOutcome> {
        let mut std_cmd = std::process::Command::new(&self.interpreter);
        std_cmd
            .args(&self.args)
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        apply_limits(&mut std_cmd, &self.limits);

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        debug!("Running {:?} {:?} {:?}", self.interpreter, self.args, script);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ServiceError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;

        // Captured now: once `wait` completes, `Child::id` returns None, but
        // background members of the group may still hold the pipes open.
        let pgid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.limits.max_output_bytes;

        // The run ends when the process has exited and both pipes are closed.
        let supervised = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                read_capped(stdout, cap),
                read_capped(stderr, cap)
            );
            Ok::<_, io::Error>((status?, stdout?, stderr?))
        };
        let waited = tokio::time::timeout(timeout, supervised).await;

        match waited {
            Ok(result) => {
                let (status, stdout, stderr) = result.map_err(ServiceError::Supervise)?;
                let duration = start.elapsed();
                // Detached members of the group must not outlive the request.
                if let Err(e) = kill_group(pgid) {
                    warn!("Failed to kill leftover process group: {}", e);
                }
                let exit_code = exit_code(status);
                debug!(
                    "Process exited: exit_code={}, time_ms={}",
                    exit_code,
                    duration.as_millis()
                );

                Ok(ExecutionOutcome {
                    stdout,
                    stderr,
                    exit_code,
                    duration,
                    status: RunStatus::Completed,
                })
            }
            Err(_) => {
                terminate(&mut child, pgid).await?;
                let duration = start.elapsed();
                info!(
                    "Execution timed out after {:?}, process group killed ({} ms elapsed)",
                    timeout,
                    duration.as_millis()
                );

                Ok(ExecutionOutcome::timed_out(timeout, duration))
            }
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(&self, artifact: &ScratchArtifact, timeout: Duration) -> Result<ExecutionOutcome> {
        self.execute(artifact.path(), timeout).await
    }
}

/// Kill the child's process group and reap the child
async fn terminate(child: &mut Child, pgid: Option<u32>) -> Result<()> {
    if let Err(e) = kill_group(pgid) {
        warn!("killpg failed: {}. Killing direct child only", e);
        child.start_kill().map_err(ServiceError::Supervise)?;
    }

    child.wait().await.map_err(ServiceError::Supervise)?;
    Ok(())
}

/// SIGKILL whatever is left in the group; an empty group is not an error
fn kill_group(pgid: Option<u32>) -> nix::Result<()> {
    let Some(pid) = pgid else {
        return Ok(());
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes
async fn read_capped<R: AsyncRead + Unpin>(stream: Option<R>, cap: usize) -> io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        (&mut stream).take(cap as u64).read_to_end(&mut buf).await?;
        // Keep the pipe drained so the child never blocks on a full buffer.
        tokio::io::copy(&mut stream, &mut tokio::io::sink()).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Exit code of a finished child; a signal maps to `128 + signal`
fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => super::TIMEOUT_EXIT_CODE,
    }
}

fn apply_limits(cmd: &mut std::process::Command, limits: &ResourceLimits) {
    let memory_bytes = limits.memory_mb.map(|mb| mb * 1024 * 1024);
    let file_bytes = limits.file_size_kb.map(|kb| kb * 1024);
    if memory_bytes.is_none() && file_bytes.is_none() {
        return;
    }

    // SAFETY: the closure only calls setrlimit, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(bytes) = memory_bytes {
                setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
            }
            if let Some(bytes) = file_bytes {
                setrlimit(Resource::RLIMIT_FSIZE, bytes, bytes)?;
            }
            Ok(())
        });
    }
}
