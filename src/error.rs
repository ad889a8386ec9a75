//! Internal error taxonomy
//!
//! Only failures of the service's own machinery live here. Policy denials,
//! timeouts and non-zero exits are ordinary results, not errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure inside the artifact or process handling pipeline.
///
/// The `Display` text is the top-level message shown to callers. Paths and
/// OS error details stay in the source chain and are only logged.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to write scratch artifact")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to prepare scratch directory")]
    ScratchDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start interpreter")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed while supervising execution")]
    Supervise(#[source] io::Error),
}

impl ServiceError {
    /// Full diagnostic line for operators: top-level message, context, and
    /// every source in the chain.
    pub fn detail(&self) -> String {
        let context = match self {
            ServiceError::ArtifactWrite { path, .. } | ServiceError::ScratchDir { path, .. } => {
                format!(" (path: {})", path.display())
            }
            ServiceError::Spawn { program, .. } => format!(" (program: {})", program.display()),
            ServiceError::Supervise(_) => String::new(),
        };

        let mut detail = format!("{}{}", self, context);
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            detail.push_str(": ");
            detail.push_str(&err.to_string());
            source = err.source();
        }
        detail
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hides_source() {
        let err = ServiceError::Spawn {
            program: PathBuf::from("/opt/python/bin/python3"),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };

        assert_eq!(err.to_string(), "failed to start interpreter");
        assert_eq!(
            err.detail(),
            "failed to start interpreter (program: /opt/python/bin/python3): No such file or directory"
        );
    }

    #[test]
    fn test_detail_without_context() {
        let err = ServiceError::Supervise(io::Error::new(io::ErrorKind::Other, "pipe closed"));
        assert_eq!(err.detail(), "failed while supervising execution: pipe closed");
    }
}
