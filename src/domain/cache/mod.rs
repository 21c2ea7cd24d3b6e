//! Cache domain - content-addressed suggestion cache entries

mod entry;
mod key;

pub use entry::{CacheEntry, CacheStats};
pub use key::{normalize_message, CacheKey};
