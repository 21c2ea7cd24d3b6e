//! In-memory durable store implementation

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::storage::DurableStore;
use crate::domain::DomainError;

/// Thread-safe in-memory store
///
/// Useful for testing and ephemeral sessions. Data is lost when the process terminates.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with documents
    pub fn with_documents<I, K, V>(documents: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store
                .documents
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            for (key, value) in documents {
                map.insert(key.into(), value.into());
            }
        }
        store
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>, DomainError> {
        let documents = self.documents.read().map_err(|e| {
            DomainError::storage(format!("Failed to acquire read lock: {}", e))
        })?;

        Ok(documents.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), DomainError> {
        let mut documents = self.documents.write().map_err(|e| {
            DomainError::storage(format!("Failed to acquire write lock: {}", e))
        })?;

        documents.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, DomainError> {
        let mut documents = self.documents.write().map_err(|e| {
            DomainError::storage(format!("Failed to acquire write lock: {}", e))
        })?;

        Ok(documents.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, DomainError> {
        let documents = self.documents.read().map_err(|e| {
            DomainError::storage(format!("Failed to acquire read lock: {}", e))
        })?;

        let mut keys: Vec<String> = documents.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn contains(&self, key: &str) -> Result<bool, DomainError> {
        let documents = self.documents.read().map_err(|e| {
            DomainError::storage(format!("Failed to acquire read lock: {}", e))
        })?;

        Ok(documents.contains_key(key))
    }
}
