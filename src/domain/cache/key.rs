//! Cache key derivation

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::suggestion::SubjectId;

/// Separates subject and message so `("1", "1hey")` and `("11", "hey")` differ
const KEY_SEPARATOR: u8 = 0x1f;

/// Lower-cases and trims a message before hashing
pub fn normalize_message(message: &str) -> String {
    message.trim().to_lowercase()
}

/// Deterministic hash of `(subject_id, normalize(message))`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a subject/message pair. Pure, no I/O.
    pub fn derive(subject_id: &SubjectId, message: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(subject_id.as_str().as_bytes());
        hasher.update([KEY_SEPARATOR]);
        hasher.update(normalize_message(message).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
