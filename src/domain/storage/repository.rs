//! Durable store trait definition

use std::fmt::Debug;

use async_trait::async_trait;

use crate::domain::DomainError;

/// Key-value persistence that survives process restart.
///
/// Values are JSON documents; the cache and the queue each own one key.
#[async_trait]
pub trait DurableStore: Send + Sync + Debug {
    /// Reads the raw document stored under `key`
    async fn load(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Writes (replaces) the document stored under `key`
    async fn save(&self, key: &str, value: &str) -> Result<(), DomainError>;

    /// Removes a document, returns true if it existed
    async fn remove(&self, key: &str) -> Result<bool, DomainError>;

    /// Lists every stored key
    async fn keys(&self) -> Result<Vec<String>, DomainError>;

    /// Checks if a document exists
    async fn contains(&self, key: &str) -> Result<bool, DomainError> {
        Ok(self.load(key).await?.is_some())
    }
}
