//! Cache infrastructure - the persisted response cache

mod response_cache;

pub use response_cache::{ResponseCache, ResponseCacheConfig};
