//! Result assembly
//!
//! Every request ends in exactly one `ServiceResult`, which renders to the
//! boundary shape `ExecuteResponse`. A timed out run is a completed result,
//! not a service error.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

use crate::error::ServiceError;
use crate::runner::ExecutionOutcome;

/// Externally observable result of one request
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceResult {
    /// The code ran; includes non-zero exits and timeouts
    Completed(ExecutionOutcome),
    /// Vetting rejected the code; carries the violation reason
    PolicyDenied(String),
    /// The service's own machinery failed; carries the top-level message
    InternalError(String),
}

impl ServiceResult {
    /// Fold the execution pipeline's result into a `ServiceResult`.
    ///
    /// Internal errors are logged in full here and reduced to their
    /// top-level message for the caller.
    pub fn assemble(result: Result<ExecutionOutcome, ServiceError>) -> Self {
        match result {
            Ok(outcome) => ServiceResult::Completed(outcome),
            Err(e) => {
                error!("Execution failed: {}", e.detail());
                ServiceResult::InternalError(e.to_string())
            }
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        ServiceResult::PolicyDenied(reason.into())
    }

    /// HTTP-style status for transports: 200, 400 for a denial, 500 for internal errors
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceResult::Completed(_) => 200,
            ServiceResult::PolicyDenied(_) => 400,
            ServiceResult::InternalError(_) => 500,
        }
    }

    pub fn to_response(&self) -> ExecuteResponse {
        match self {
            ServiceResult::Completed(outcome) => ExecuteResponse::Success {
                output: outcome.stdout.clone(),
                error: outcome.stderr.clone(),
                returncode: outcome.exit_code,
                execution_time: format_duration(outcome.duration),
            },
            ServiceResult::PolicyDenied(reason) => ExecuteResponse::Failure {
                error: format!("Code is not safe: {}", reason),
            },
            ServiceResult::InternalError(message) => ExecuteResponse::Failure {
                error: format!("An unexpected error occurred: {}", message),
            },
        }
    }
}

impl From<ExecutionOutcome> for ServiceResult {
    fn from(outcome: ExecutionOutcome) -> Self {
        ServiceResult::Completed(outcome)
    }
}

/// Wire shape returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecuteResponse {
    Success {
        output: String,
        error: String,
        returncode: i32,
        execution_time: String,
    },
    Failure {
        error: String,
    },
}

/// Seconds with four decimals, e.g. `"0.0123 seconds"`
pub fn format_duration(duration: Duration) -> String {
    format!("{:.4} seconds", duration.as_secs_f64())
}
