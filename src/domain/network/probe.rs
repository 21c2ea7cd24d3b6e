use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::NetworkSnapshot;
use crate::domain::DomainError;

/// Active connectivity check against the OS
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Fetches the current connectivity state
    async fn probe(&self) -> Result<NetworkSnapshot, DomainError>;
}
