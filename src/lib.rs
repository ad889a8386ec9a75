//! Snippet Runner - vetted, time-bounded execution of untrusted Python snippets
//!
//! Submitted code goes through four stages:
//! - `policy`: static vetting against an import allow-list and call patterns
//! - `artifact`: a uniquely named scratch file that never outlives its request
//! - `runner`: a supervised child process under a wall-clock watchdog
//! - `response`: one result shape for completed, denied and failed requests
//!
//! `service::ExecutionService` wires them together.

pub mod artifact;
pub mod config;
pub mod error;
pub mod policy;
pub mod response;
pub mod runner;
pub mod service;

pub use artifact::{ArtifactManager, ScratchArtifact};
pub use config::ServiceConfig;
pub use error::ServiceError;
pub use policy::{PolicyChecker, PolicyConfig, PolicyDecision};
pub use response::{format_duration, ExecuteResponse, ServiceResult};
pub use runner::{ExecutionOutcome, ProcessSandbox, ResourceLimits, RunStatus, Sandbox};
pub use service::ExecutionService;
