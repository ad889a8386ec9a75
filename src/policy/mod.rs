//! Policy module - Static vetting of submitted code
//!
//! This module decides whether submitted source may run at all:
//! - `PolicyConfig`: the immutable import allow-list, loaded once at startup
//! - `PolicyChecker`: line-oriented checks that stop at the first violation
//!
//! The checks are textual. They do not catch dynamic imports, `eval`/`exec`,
//! or calls reached through aliases; isolation of the process itself is the
//! runner's job.

pub mod patterns;

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

pub const FILE_WRITE_REASON: &str = "File writing is not allowed";
pub const OS_SYSTEM_REASON: &str = "os.system() is not allowed";
pub const SHELL_REASON: &str = "Shell execution within subprocess is not allowed.";

/// Import allow-list shared read-only by every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    allowed_imports: HashSet<String>,
}

/// Raw TOML policy file
#[derive(Debug, Deserialize)]
struct RawPolicyConfig {
    allowed_imports: Vec<String>,
}

impl PolicyConfig {
    pub fn new(allowed_imports: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed_imports: allowed_imports.into_iter().map(Into::into).collect(),
        }
    }

    /// Allow-list compiled into the binary from `files/policy.toml`
    pub fn builtin() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/policy.toml"));
        Self::from_toml(content).context("Invalid built-in policy")
    }

    /// Load an allow-list from a TOML file on disk
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid policy file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw: RawPolicyConfig = toml::from_str(content)?;

        for name in &raw.allowed_imports {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_');
            if !valid {
                anyhow::bail!("Invalid module name in allowed_imports: {:?}", name);
            }
        }

        Ok(Self::new(raw.allowed_imports))
    }

    pub fn is_allowed(&self, module: &str) -> bool {
        self.allowed_imports.contains(module)
    }

    pub fn len(&self) -> usize {
        self.allowed_imports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed_imports.is_empty()
    }
}

/// Outcome of vetting one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    /// First violation found; always set when `allowed` is false
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Vets submitted code against a `PolicyConfig`
#[derive(Debug, Clone)]
pub struct PolicyChecker {
    config: Arc<PolicyConfig>,
}

impl PolicyChecker {
    pub fn new(config: Arc<PolicyConfig>) -> Self {
        Self { config }
    }

    /// Check every line in order and stop at the first violation.
    pub fn check(&self, code: &str) -> PolicyDecision {
        for (idx, raw) in code.lines().enumerate() {
            if let Some(reason) = self.check_line(raw) {
                debug!("Policy violation on line {}: {}", idx + 1, reason);
                return PolicyDecision::deny(reason);
            }
        }
        PolicyDecision::allow()
    }

    fn check_line(&self, raw: &str) -> Option<String> {
        let line = raw.trim();

        if let Some(modules) = patterns::imported_modules(line) {
            if let Some(module) = modules.into_iter().find(|m| !self.config.is_allowed(m)) {
                return Some(format!("Disallowed import: {}", module));
            }
        }

        if patterns::is_full_line_comment(raw) {
            return None;
        }

        if patterns::opens_for_writing(line) {
            return Some(FILE_WRITE_REASON.to_string());
        }
        if patterns::calls_os_system(line) {
            return Some(OS_SYSTEM_REASON.to_string());
        }
        if patterns::spawns_shell(line) {
            return Some(SHELL_REASON.to_string());
        }

        None
    }
}
