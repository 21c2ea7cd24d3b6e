//! Persisted document schemas and their migration chains

mod cache;
mod queue;

pub use cache::{cache_chain, CacheDocument, CACHE_SCHEMA_VERSION};
pub use queue::{queue_chain, QueueDocument, QUEUE_SCHEMA_VERSION};

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Legacy documents stored subject ids as numbers or strings
fn legacy_subject_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Legacy documents stored instants as epoch milliseconds
fn legacy_instant(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
}
