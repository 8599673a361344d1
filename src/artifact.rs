//! Staging of function code on the host before it is copied into the VM.
//!
//! Every artifact lives in its own freshly created temporary directory. The
//! [`StagedArtifact`] handle owns both the file and the directory and removes
//! them when released, either explicitly through [`StagedArtifact::cleanup`]
//! or, on early exits, when the handle is dropped.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

const ARTIFACT_DIR_PREFIX: &str = "fnbox-artifact-";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Invalid artifact filename: {0}")]
    InvalidFilename(String),

    #[error("Failed to stage artifact {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove staged artifact {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Creates staged artifacts under a base directory.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStager {
    base_dir: Option<PathBuf>,
}

impl ArtifactStager {
    /// Stage into the system temp directory.
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Stage into `base_dir` instead of the system temp directory.
    pub fn in_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    /// Write `bytes` to `filename` inside a new unique directory.
    pub fn stage(&self, filename: &str, bytes: &[u8]) -> Result<StagedArtifact, ArtifactError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename == "."
            || filename == ".."
        {
            return Err(ArtifactError::InvalidFilename(filename.to_string()));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(ARTIFACT_DIR_PREFIX);
        let dir = match &self.base_dir {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|source| ArtifactError::Stage {
            path: self.base_dir.clone().unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        let path = dir.path().join(filename);
        let write = std::fs::File::create(&path).and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        });
        // `dir` is dropped on this path, which removes whatever was written.
        write.map_err(|source| ArtifactError::Stage {
            path: path.clone(),
            source,
        })?;

        debug!("Staged {} bytes at {}", bytes.len(), path.display());
        Ok(StagedArtifact {
            path,
            dir: Some(dir),
        })
    }
}

/// A code file on local disk, exclusively owned by one execution.
#[derive(Debug)]
pub struct StagedArtifact {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl StagedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// Delete the file, then its directory.
    pub fn cleanup(mut self) -> Result<(), ArtifactError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), ArtifactError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        let file_result = match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ArtifactError::Cleanup {
                path: self.path.clone(),
                source,
            }),
        };

        let dir_path = dir.path().to_path_buf();
        let dir_result = dir.close().map_err(|source| ArtifactError::Cleanup {
            path: dir_path,
            source,
        });

        debug!("Released staged artifact {}", self.path.display());
        file_result.and(dir_result)
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if self.dir.is_some() {
            if let Err(e) = self.release() {
                warn!("Error cleaning up staged artifact: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stage_and_cleanup() {
        let base = tempdir().unwrap();
        let stager = ArtifactStager::in_dir(base.path());

        let artifact = stager.stage("1_main.py", b"def handler(e, c): return 1").unwrap();
        let path = artifact.path().to_path_buf();
        let dir = artifact.dir().to_path_buf();

        assert!(dir.starts_with(base.path()));
        assert_eq!(std::fs::read(&path).unwrap(), b"def handler(e, c): return 1");

        artifact.cleanup().unwrap();
        assert!(!path.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_drop_releases_artifact() {
        let base = tempdir().unwrap();
        let stager = ArtifactStager::in_dir(base.path());

        let (path, dir) = {
            let artifact = stager.stage("main.py", b"x = 1").unwrap();
            (artifact.path().to_path_buf(), artifact.dir().to_path_buf())
        };

        assert!(!path.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_each_stage_gets_its_own_directory() {
        let base = tempdir().unwrap();
        let stager = ArtifactStager::in_dir(base.path());

        let a = stager.stage("main.py", b"a").unwrap();
        let b = stager.stage("main.py", b"b").unwrap();
        assert_ne!(a.dir(), b.dir());
        assert_eq!(std::fs::read(b.path()).unwrap(), b"b");
    }

    #[test]
    fn test_cleanup_tolerates_missing_file() {
        let base = tempdir().unwrap();
        let artifact = ArtifactStager::in_dir(base.path())
            .stage("main.py", b"x")
            .unwrap();
        std::fs::remove_file(artifact.path()).unwrap();
        let dir = artifact.dir().to_path_buf();

        artifact.cleanup().unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_rejects_path_like_filenames() {
        let stager = ArtifactStager::new();
        assert!(matches!(
            stager.stage("../escape.py", b"x"),
            Err(ArtifactError::InvalidFilename(_))
        ));
        assert!(matches!(stager.stage("", b"x"), Err(ArtifactError::InvalidFilename(_))));
    }
}
