//! Session-scoped wrapper that degrades to in-memory operation on store failure

use std::sync::{Arc, RwLock};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::domain::storage::{Durability, DurableStore, MigrationChain};
use crate::domain::DomainError;

/// A document restored at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Restored<T> {
    pub payload: T,
    /// Schema version the document was found in, `None` when nothing was stored
    pub from_version: Option<u32>,
    pub durability: Durability,
}

/// Durable store shared by the cache and the queue for one session.
///
/// The first failed read or write flips the whole session to in-memory-only
/// operation. Callers keep working; every later mutation reports
/// [`Durability::InMemoryOnly`] instead of touching the store again.
#[derive(Debug)]
pub struct SessionStore {
    store: Arc<dyn DurableStore>,
    degraded: RwLock<Option<String>>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            degraded: RwLock::new(None),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_reason().is_some()
    }

    /// Reason the session lost durability, if it did
    pub fn degraded_reason(&self) -> Option<String> {
        self.degraded
            .read()
            .map(|reason| reason.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn degrade(&self, error: &DomainError) -> Durability {
        let reason = error.to_string();

        let mut degraded = self
            .degraded
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if degraded.is_none() {
            warn!(error = %reason, "Durable store failed, continuing in memory for this session");
            *degraded = Some(reason.clone());
        }

        Durability::in_memory_only(reason)
    }

    fn current_durability(&self) -> Option<Durability> {
        self.degraded_reason().map(Durability::in_memory_only)
    }

    /// Writes `payload` under the chain's current key
    pub async fn persist<T: Serialize>(&self, chain: &MigrationChain, payload: &T) -> Durability {
        if let Some(durability) = self.current_durability() {
            return durability;
        }

        let raw = match chain.encode(payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(document = chain.name(), error = %e, "Failed to encode document");
                return Durability::in_memory_only(e.to_string());
            }
        };

        match self.store.save(&chain.current_key(), &raw).await {
            Ok(()) => {
                debug!(document = chain.name(), bytes = raw.len(), "Document flushed");
                Durability::Persisted
            }
            Err(e) => self.degrade(&e),
        }
    }

    /// Restores a document, upgrading and relocating legacy versions.
    ///
    /// Corrupt documents are discarded and the session starts empty; a read
    /// failure or a schema newer than this build degrades the session so the
    /// stored data is never overwritten.
    pub async fn restore<T>(&self, chain: &MigrationChain) -> Restored<T>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        if let Some(durability) = self.current_durability() {
            return Restored {
                payload: T::default(),
                from_version: None,
                durability,
            };
        }

        let mut candidates = vec![(chain.current_version(), chain.current_key())];
        candidates.extend(chain.legacy_keys());

        for (version, key) in candidates {
            let raw = match self.store.load(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => return self.restore_failed(&e),
            };

            let payload: T = match chain.decode(&raw, version) {
                Ok(payload) => payload,
                Err(e @ DomainError::Migration { .. }) => return self.restore_failed(&e),
                Err(e) => {
                    warn!(
                        document = chain.name(),
                        key = %key,
                        error = %e,
                        "Discarding unreadable document"
                    );
                    return Restored {
                        payload: T::default(),
                        from_version: None,
                        durability: Durability::Persisted,
                    };
                }
            };

            let durability = if version < chain.current_version() {
                self.relocate(chain, &key, &payload).await
            } else {
                Durability::Persisted
            };

            return Restored {
                payload,
                from_version: Some(version),
                durability,
            };
        }

        Restored {
            payload: T::default(),
            from_version: None,
            durability: Durability::Persisted,
        }
    }

    fn restore_failed<T: Default>(&self, error: &DomainError) -> Restored<T> {
        Restored {
            payload: T::default(),
            from_version: None,
            durability: self.degrade(error),
        }
    }

    async fn relocate<T: Serialize>(
        &self,
        chain: &MigrationChain,
        legacy_key: &str,
        payload: &T,
    ) -> Durability {
        let durability = self.persist(chain, payload).await;
        if !durability.is_persisted() {
            return durability;
        }

        info!(
            document = chain.name(),
            from = legacy_key,
            to = %chain.current_key(),
            "Migrated legacy document"
        );

        if let Err(e) = self.store.remove(legacy_key).await {
            warn!(key = legacy_key, error = %e, "Failed to remove legacy document");
        }

        durability
    }
}
