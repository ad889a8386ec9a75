//! Service configuration
//!
//! Built once at startup from environment variables (after `.env` is loaded)
//! and never changed afterwards.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::policy::PolicyConfig;
use crate::runner::ResourceLimits;

/// Default wall-clock budget per run (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
/// Upper bound a caller-requested timeout is clamped to (seconds)
pub const DEFAULT_MAX_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SCRATCH_DIR: &str = "temp_scripts";
pub const DEFAULT_INTERPRETER: &str = "python3";
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 8;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Import allow-list shared by every request
    pub policy: Arc<PolicyConfig>,
    /// Interpreter used to run scripts
    pub interpreter: PathBuf,
    /// Interpreter arguments placed before the script path
    pub interpreter_args: Vec<String>,
    /// Directory holding scratch artifacts
    pub scratch_dir: PathBuf,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub limits: ResourceLimits,
    /// Runs the driver allows in flight at once
    pub max_concurrent_runs: usize,
}

impl ServiceConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let policy = match lookup("POLICY_CONFIG") {
            Some(path) => PolicyConfig::load(Path::new(&path))?,
            None => PolicyConfig::builtin()?,
        };

        let interpreter = lookup("PYTHON_BIN").unwrap_or_else(|| DEFAULT_INTERPRETER.into());
        let interpreter_args = lookup("PYTHON_ARGS")
            .map(|args| args.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        let scratch_dir = lookup("SCRATCH_DIR").unwrap_or_else(|| DEFAULT_SCRATCH_DIR.into());

        let default_timeout = match lookup("MAX_EXECUTION_TIME") {
            Some(value) => parse_secs("MAX_EXECUTION_TIME", &value)?,
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        let max_timeout = match lookup("MAX_TIMEOUT") {
            Some(value) => parse_secs("MAX_TIMEOUT", &value)?,
            None => Duration::from_secs(DEFAULT_MAX_TIMEOUT_SECS).max(default_timeout),
        };
        if default_timeout > max_timeout {
            anyhow::bail!(
                "MAX_EXECUTION_TIME ({:?}) exceeds MAX_TIMEOUT ({:?})",
                default_timeout,
                max_timeout
            );
        }

        let defaults = ResourceLimits::default();
        let limits = ResourceLimits {
            memory_mb: parse_optional(&lookup, "MEMORY_LIMIT_MB")?,
            file_size_kb: parse_optional(&lookup, "FILE_SIZE_LIMIT_KB")?,
            max_output_bytes: parse_optional(&lookup, "MAX_OUTPUT_BYTES")?
                .unwrap_or(defaults.max_output_bytes),
        };

        let max_concurrent_runs = parse_optional(&lookup, "MAX_CONCURRENT_RUNS")?
            .unwrap_or(DEFAULT_MAX_CONCURRENT_RUNS);
        if max_concurrent_runs == 0 {
            anyhow::bail!("MAX_CONCURRENT_RUNS must be at least 1");
        }

        Ok(Self {
            policy: Arc::new(policy),
            interpreter: interpreter.into(),
            interpreter_args,
            scratch_dir: scratch_dir.into(),
            default_timeout,
            max_timeout,
            limits,
            max_concurrent_runs,
        })
    }
}

fn parse_secs(key: &str, value: &str) -> anyhow::Result<Duration> {
    let secs = value
        .trim()
        .parse::<f64>()
        .with_context(|| format!("Invalid {}: {}", key, value))?;
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("Invalid {}: {} (must be a positive number of seconds)", key, value);
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_optional<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {}: {}", key, value))
        })
        .transpose()
}
