//! Execution service - the vet, materialize, run, clean up pipeline
//!
//! One `ExecutionService` is built at startup and shared across requests.
//! It holds no per-request state; each call owns its artifact and outcome.

use std::time::Duration;
use tracing::{debug, info};

use crate::artifact::ArtifactManager;
use crate::config::{ServiceConfig, DEFAULT_MAX_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS};
use crate::error::Result;
use crate::policy::PolicyChecker;
use crate::response::ServiceResult;
use crate::runner::{ExecutionOutcome, ProcessSandbox, Sandbox};

pub struct ExecutionService<S = ProcessSandbox> {
    checker: PolicyChecker,
    artifacts: ArtifactManager,
    sandbox: S,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl ExecutionService<ProcessSandbox> {
    /// Build the service the driver runs with
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let artifacts = ArtifactManager::new(&config.scratch_dir)?;
        let sandbox = ProcessSandbox::new(&config.interpreter)
            .with_args(&config.interpreter_args)
            .with_limits(config.limits.clone());

        Ok(Self::new(
            PolicyChecker::new(config.policy.clone()),
            artifacts,
            sandbox,
        )
        .with_timeouts(config.default_timeout, config.max_timeout))
    }
}

impl<S: Sandbox> ExecutionService<S> {
    pub fn new(checker: PolicyChecker, artifacts: ArtifactManager, sandbox: S) -> Self {
        Self {
            checker,
            artifacts,
            sandbox,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_timeout: Duration::from_secs(DEFAULT_MAX_TIMEOUT_SECS),
        }
    }

    pub fn with_timeouts(mut self, default_timeout: Duration, max_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self.max_timeout = max_timeout.max(default_timeout);
        self
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Requested timeout, or the default, clamped to the configured maximum
    pub fn resolve_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// Vet and run one submission.
    ///
    /// Denied code never reaches the filesystem. For accepted code the
    /// scratch artifact is gone by the time this returns, whatever happened.
    pub async fn execute(&self, code: &str, timeout: Option<Duration>) -> ServiceResult {
        let decision = self.checker.check(code);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_default();
            info!("Rejected submission: {}", reason);
            return ServiceResult::denied(reason);
        }

        let timeout = self.resolve_timeout(timeout);
        let result = ServiceResult::assemble(self.run_vetted(code, timeout).await);
        if let ServiceResult::Completed(outcome) = &result {
            info!(
                "Execution completed: status={:?}, exit_code={}, time_ms={}",
                outcome.status,
                outcome.exit_code,
                outcome.duration.as_millis()
            );
        }
        result
    }

    async fn run_vetted(&self, code: &str, timeout: Duration) -> Result<ExecutionOutcome> {
        let artifact = self.artifacts.create(code).await?;
        debug!("Running artifact {} with timeout {:?}", artifact.id(), timeout);

        let outcome = self.sandbox.run(&artifact, timeout).await;
        artifact.destroy();
        outcome
    }
}
