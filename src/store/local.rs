use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::{CodeStore, CodeStoreError, FunctionRecord, FunctionRepository, RepositoryError};

const MANIFEST_FILE: &str = "functions.toml";

/// Functions laid out on disk, one directory per owner:
///
/// ```text
/// <root>/<owner>/functions.toml
/// <root>/<owner>/main.py
/// ```
///
/// with a manifest of the form
///
/// ```toml
/// [[functions]]
/// handler = "main.handler"
/// runtime = "python"
/// code = "main.py"
/// ```
#[derive(Debug, Clone)]
pub struct LocalFunctionStore {
    root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    functions: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    handler: String,
    runtime: String,
    code: String,
}

impl LocalFunctionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage key under the root, refusing anything that escapes it.
    fn resolve(&self, storage_key: &str) -> Option<PathBuf> {
        let relative = Path::new(storage_key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if storage_key.is_empty() || !safe {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl FunctionRepository for LocalFunctionStore {
    async fn find_function(
        &self,
        owner_id: &str,
        handler: &str,
    ) -> Result<Option<FunctionRecord>, RepositoryError> {
        let Some(owner_dir) = self.resolve(owner_id) else {
            return Ok(None);
        };
        let manifest_path = owner_dir.join(MANIFEST_FILE);

        let content = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No manifest at {}", manifest_path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(RepositoryError::Unavailable(format!(
                    "{}: {}",
                    manifest_path.display(),
                    e
                )))
            }
        };

        let manifest: Manifest = toml::from_str(&content).map_err(|e| {
            RepositoryError::Unavailable(format!("{}: {}", manifest_path.display(), e))
        })?;

        Ok(manifest
            .functions
            .into_iter()
            .find(|entry| entry.handler == handler)
            .map(|entry| FunctionRecord {
                owner_id: owner_id.to_string(),
                handler: entry.handler,
                runtime: entry.runtime,
                storage_key: format!("{}/{}", owner_id, entry.code),
            }))
    }
}

#[async_trait]
impl CodeStore for LocalFunctionStore {
    async fn fetch_code(&self, storage_key: &str) -> Result<Vec<u8>, CodeStoreError> {
        let path = self
            .resolve(storage_key)
            .ok_or_else(|| CodeStoreError::InvalidBody(storage_key.to_string()))?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CodeStoreError::Missing(storage_key.to_string()))
            }
            Err(e) => Err(CodeStoreError::Unavailable(format!("{}: {}", path.display(), e))),
        }
    }
}
