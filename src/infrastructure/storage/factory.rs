//! Store factory for runtime backend selection

use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::storage::DurableStore;
use crate::domain::DomainError;

use super::file::FileStore;
use super::in_memory::InMemoryStore;

/// Supported store backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageType {
    /// In-memory store (tests, ephemeral sessions)
    InMemory,
    /// One JSON file per document in a directory
    File,
}

impl StorageType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Some(Self::InMemory),
            "file" | "fs" | "json" => Some(Self::File),
            _ => None,
        }
    }
}

/// Store configuration
#[derive(Debug, Clone)]
pub enum StorageConfig {
    InMemory,
    File { dir: PathBuf },
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self::InMemory
    }

    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::File { dir: dir.into() }
    }

    /// Builds a configuration from a backend name and a path
    pub fn from_parts(backend: &str, path: impl Into<PathBuf>) -> Result<Self, DomainError> {
        match StorageType::from_str(backend) {
            Some(StorageType::InMemory) => Ok(Self::InMemory),
            Some(StorageType::File) => Ok(Self::file(path)),
            None => Err(DomainError::configuration(format!(
                "Unknown storage backend '{}'",
                backend
            ))),
        }
    }

    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::InMemory => StorageType::InMemory,
            Self::File { .. } => StorageType::File,
        }
    }
}

/// Factory for creating store instances
#[derive(Debug)]
pub struct StorageFactory;

impl StorageFactory {
    pub async fn create(config: &StorageConfig) -> Result<Arc<dyn DurableStore>, DomainError> {
        match config {
            StorageConfig::InMemory => Ok(Arc::new(InMemoryStore::new())),
            StorageConfig::File { dir } => Ok(Arc::new(FileStore::open(dir).await?)),
        }
    }

    pub fn create_in_memory() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new())
    }
}
