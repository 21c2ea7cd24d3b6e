//! File-backed durable store: one JSON file per document

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::domain::storage::DurableStore;
use crate::domain::DomainError;

const EXTENSION: &str = "json";

/// Durable store writing `<dir>/<key>.json`
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, DomainError> {
        let dir = dir.as_ref().to_path_buf();

        fs::create_dir_all(&dir).await.map_err(|e| {
            DomainError::storage(format!(
                "Failed to create store directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, DomainError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.{}", key, EXTENSION)))
    }
}

fn validate_key(key: &str) -> Result<(), DomainError> {
    if key.is_empty() {
        return Err(DomainError::validation("Store key cannot be empty"));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DomainError::validation(format!(
            "Invalid store key '{}': only [A-Za-z0-9_-] allowed",
            key
        )));
    }

    Ok(())
}

#[async_trait]
impl DurableStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<String>, DomainError> {
        let path = self.path_for(key)?;

        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DomainError::storage(format!(
                "Failed to read '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), DomainError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension(format!("{}.tmp", EXTENSION));

        fs::write(&tmp, value).await.map_err(|e| {
            DomainError::storage(format!("Failed to write '{}': {}", tmp.display(), e))
        })?;

        fs::rename(&tmp, &path).await.map_err(|e| {
            DomainError::storage(format!(
                "Failed to move '{}' into place: {}",
                path.display(),
                e
            ))
        })
    }

    async fn remove(&self, key: &str) -> Result<bool, DomainError> {
        let path = self.path_for(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DomainError::storage(format!(
                "Failed to remove '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, DomainError> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| {
            DomainError::storage(format!(
                "Failed to list '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut keys = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DomainError::storage(format!("Failed to list store entry: {}", e)))?
        {
            let path = entry.path();

            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }

            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(stem.to_string());
            }
        }

        keys.sort();
        Ok(keys)
    }
}
