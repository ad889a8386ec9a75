//! Scratch artifact management
//!
//! Each request gets its own script file named after a fresh UUID inside the
//! scratch directory. The file lives exactly as long as its `ScratchArtifact`
//! handle: `destroy` removes it explicitly, and `Drop` removes it on every
//! other exit path (errors, timeouts, cancelled futures, panics).

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, ServiceError};

/// Owner of the scratch directory
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    scratch_dir: PathBuf,
}

impl ArtifactManager {
    /// Create the manager, creating the scratch directory if it is missing
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Result<Self> {
        let scratch_dir = scratch_dir.into();
        std::fs::create_dir_all(&scratch_dir).map_err(|source| ServiceError::ScratchDir {
            path: scratch_dir.clone(),
            source,
        })?;
        Ok(Self { scratch_dir })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Write `code` verbatim to a new, uniquely named scratch file
    pub async fn create(&self, code: &str) -> Result<ScratchArtifact> {
        let id = Uuid::new_v4();
        let path = self.scratch_dir.join(format!("script_{}.py", id));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| ServiceError::ArtifactWrite {
                path: path.clone(),
                source,
            })?;

        // From here on the handle owns the file, so a failed write still removes it.
        let artifact = ScratchArtifact {
            id,
            path,
            contents: code.to_string(),
            destroyed: false,
        };

        let written = match file.write_all(code.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(source) = written {
            return Err(ServiceError::ArtifactWrite {
                path: artifact.path.clone(),
                source,
            });
        }

        debug!("Created scratch artifact {} at {:?}", artifact.id, artifact.path);
        Ok(artifact)
    }
}

/// One request's script on disk
#[derive(Debug)]
pub struct ScratchArtifact {
    id: Uuid,
    path: PathBuf,
    contents: String,
    destroyed: bool,
}

impl ScratchArtifact {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Remove the scratch file. Never fails; problems are logged.
    pub fn destroy(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed scratch artifact {}", self.id),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Error deleting scratch artifact {:?}: {}",
                self.path, e
            ),
        }
    }
}

impl Drop for ScratchArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_create_writes_code_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path()).unwrap();

        let code = "print('hello')\n\tx = 'ünïcode'\r\n";
        let artifact = assert_ok!(manager.create(code).await);

        assert_eq!(std::fs::read_to_string(artifact.path()).unwrap(), code);
        assert_eq!(artifact.contents(), code);
        assert_eq!(artifact.path().parent(), Some(dir.path()));
        assert_eq!(
            artifact.path().file_name().unwrap().to_string_lossy(),
            format!("script_{}.py", artifact.id())
        );
    }

    #[tokio::test]
    async fn test_destroy_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path()).unwrap();

        let artifact = manager.create("x = 1").await.unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());

        artifact.destroy();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_destroy_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path()).unwrap();

        let artifact = manager.create("x = 1").await.unwrap();
        std::fs::remove_file(artifact.path()).unwrap();
        artifact.destroy();
    }

    #[tokio::test]
    async fn test_destroy_survives_removal_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path()).unwrap();

        // A directory in the file's place makes the unlink fail with something other than NotFound.
        let artifact = manager.create("x = 1").await.unwrap();
        let path = artifact.path().to_path_buf();
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        artifact.destroy();
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path()).unwrap();

        let path = {
            let artifact = manager.create("x = 1").await.unwrap();
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_creates_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ArtifactManager::new(dir.path()).unwrap());

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.create(&format!("print({})", i)).await })
            })
            .collect();

        let mut artifacts = Vec::new();
        for handle in handles {
            artifacts.push(handle.await.unwrap().unwrap());
        }

        let ids: HashSet<_> = artifacts.iter().map(|a| a.id()).collect();
        let paths: HashSet<_> = artifacts.iter().map(|a| a.path().to_path_buf()).collect();
        assert_eq!(ids.len(), 64);
        assert_eq!(paths.len(), 64);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 64);

        drop(artifacts);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_new_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("scratch");

        let manager = ArtifactManager::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(manager.scratch_dir(), nested.as_path());
    }

    #[test]
    fn test_new_fails_when_path_is_a_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = assert_err!(ArtifactManager::new(file.path()));
        assert!(matches!(err, ServiceError::ScratchDir { .. }));
    }
}
