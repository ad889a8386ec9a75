//! Runner module - Execution abstraction layer
//!
//! This module runs a vetted scratch artifact and reports what happened:
//! - `Sandbox`: the seam the service executes through
//! - `ProcessSandbox`: one child process per run, under a wall-clock watchdog
//!
//! The runner module does NOT:
//! - Vet code (that's the policy checker's job)
//! - Create or delete scratch files
//! - Shape responses for callers

pub mod sandboxed;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::artifact::ScratchArtifact;
use crate::error::Result;

/// Exit code reported for a run the watchdog killed
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Resource limits applied to each child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Address space limit in MB (RLIMIT_AS)
    pub memory_mb: Option<u64>,
    /// Largest file the child may write, in KB (RLIMIT_FSIZE)
    pub file_size_kb: Option<u64>,
    /// Bytes kept from each of stdout and stderr; the rest is drained and dropped
    pub max_output_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: None,
            file_size_kb: None,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The process exited on its own, with any exit code
    Completed,
    /// The watchdog fired and the process group was killed
    TimedOut,
}

/// Outcome of running one artifact
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    /// Real exit code, `128 + signal` for a signaled child, or `TIMEOUT_EXIT_CODE`
    pub exit_code: i32,
    /// Wall-clock time from spawn to terminal state
    pub duration: Duration,
    pub status: RunStatus,
}

impl ExecutionOutcome {
    pub fn timed_out(timeout: Duration, duration: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!(
                "Execution timed out after {} seconds.",
                format_timeout(timeout)
            ),
            exit_code: TIMEOUT_EXIT_CODE,
            duration,
            status: RunStatus::TimedOut,
        }
    }

    /// Check if the process ran to completion with exit code 0
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed && self.exit_code == 0
    }
}

/// Whole seconds print without a fractional part (`5`, not `5.0`)
fn format_timeout(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        timeout.as_secs().to_string()
    } else {
        timeout.as_secs_f64().to_string()
    }
}

/// Executes scratch artifacts
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run the artifact to a terminal state within `timeout`
    async fn run(&self, artifact: &ScratchArtifact, timeout: Duration) -> Result<ExecutionOutcome>;
}

// Re-exports
pub use sandboxed::ProcessSandbox;
