//! Storage domain - durable key-value persistence and versioned documents

mod document;
mod durability;
mod repository;

pub use document::{Migration, MigrationChain, MigrationFn, VersionedDocument};
pub use durability::{Durability, Durable};
pub use repository::DurableStore;

#[cfg(test)]
pub use repository::mock::MockDurableStore;
