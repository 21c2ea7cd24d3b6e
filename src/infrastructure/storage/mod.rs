//! Storage infrastructure - Durable store implementations and document schemas

mod factory;
mod file;
mod in_memory;
pub mod migrations;
mod session;

pub use factory::{StorageConfig, StorageFactory, StorageType};
pub use file::FileStore;
pub use in_memory::InMemoryStore;
pub use migrations::{cache_chain, queue_chain, CacheDocument, QueueDocument};
pub use session::{Restored, SessionStore};
