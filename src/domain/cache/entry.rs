//! Cache entry and statistics

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::CacheKey;
use crate::domain::suggestion::{SubjectId, SuggestionResult};

/// A cached suggestion result for one subject/message pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheKey,
    pub subject_id: SubjectId,
    pub input_message: String,
    pub result: SuggestionResult,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        subject_id: SubjectId,
        input_message: impl Into<String>,
        result: SuggestionResult,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let input_message = input_message.into();

        Self {
            key: CacheKey::derive(&subject_id, &input_message),
            subject_id,
            input_message,
            result,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Expired once `now` is strictly past `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Entries physically held, expired or not
    pub size: usize,
    /// Entries past their expiry awaiting the next sweep
    pub expired_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_key_matches_derivation() {
        let now = Utc::now();
        let entry = CacheEntry::new(
            SubjectId::from(1u64),
            "Hey",
            SuggestionResult::from_texts(["hi!"]),
            now,
            Duration::hours(24),
        );

        assert_eq!(entry.key, CacheKey::derive(&SubjectId::from(1u64), "hey"));
        assert_eq!(entry.expires_at, now + Duration::hours(24));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let entry = CacheEntry::new(
            SubjectId::from("s"),
            "m",
            SuggestionResult::from_texts(["ok"]),
            now,
            Duration::seconds(10),
        );

        assert!(!entry.is_expired(now + Duration::seconds(10)));
        assert!(entry.is_expired(now + Duration::seconds(11)));
    }
}

