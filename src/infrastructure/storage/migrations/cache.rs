//! Response cache document: `cache_v2`
//!
//! v1 was a key-indexed map of `{subjectId, message, result, timestamp, ttl}`
//! with epoch-millisecond times; v2 is an ordered list of [`CacheEntry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{legacy_instant, legacy_subject_id};
use crate::domain::cache::{CacheEntry, CacheKey};
use crate::domain::storage::MigrationChain;
use crate::domain::suggestion::SubjectId;
use crate::domain::DomainError;

pub const CACHE_SCHEMA_VERSION: u32 = 2;

const LEGACY_DEFAULT_TTL_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Persisted payload of the response cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDocument {
    #[serde(default)]
    pub entries: Vec<CacheEntry>,
}

pub fn cache_chain() -> MigrationChain {
    MigrationChain::new("cache", CACHE_SCHEMA_VERSION).with_migration(
        1,
        "key-indexed map with epoch millis to ordered entry list",
        cache_v1_to_v2,
    )
}

fn cache_v1_to_v2(value: Value) -> Result<Value, DomainError> {
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(json!({ "entries": [] })),
        other => {
            return Err(DomainError::serialization(format!(
                "cache v1 must be an object, found {}",
                json_kind(&other)
            )))
        }
    };

    let mut entries: Vec<(DateTime<Utc>, Value)> = map
        .into_iter()
        .filter_map(|(_, entry)| legacy_entry(&entry))
        .collect();
    entries.sort_by_key(|(created_at, _)| *created_at);

    let entries: Vec<Value> = entries.into_iter().map(|(_, entry)| entry).collect();
    Ok(json!({ "entries": entries }))
}

fn legacy_entry(entry: &Value) -> Option<(DateTime<Utc>, Value)> {
    let subject_id = legacy_subject_id(entry.get("subjectId"))?;
    let message = entry
        .get("message")
        .or_else(|| entry.get("inputMessage"))
        .and_then(Value::as_str)?;

    let created_at = legacy_instant(entry.get("timestamp"))?;
    let ttl = entry
        .get("ttl")
        .and_then(Value::as_i64)
        .unwrap_or(LEGACY_DEFAULT_TTL_MILLIS);
    let expires_at =
        DateTime::from_timestamp_millis(created_at.timestamp_millis().saturating_add(ttl))?;

    // Re-derive so v1 keys from an older hashing scheme still match lookups
    let key = CacheKey::derive(&SubjectId::new(subject_id.clone()), message);

    let migrated = json!({
        "key": key,
        "subjectId": subject_id,
        "inputMessage": message,
        "result": legacy_result(entry.get("result")),
        "createdAt": created_at,
        "expiresAt": expires_at,
    });

    Some((created_at, migrated))
}

/// v1 results were either a bare list of reply texts or `{suggestions: [text]}`
fn legacy_result(result: Option<&Value>) -> Value {
    let suggestions = match result {
        Some(Value::Array(items)) => Some(items),
        Some(Value::Object(map)) => map.get("suggestions").and_then(Value::as_array),
        _ => None,
    };

    let suggestions: Vec<Value> = suggestions
        .into_iter()
        .flatten()
        .filter_map(|item| match item {
            Value::String(text) => Some(json!({ "text": text })),
            Value::Object(_) if item.get("text").is_some() => Some(item.clone()),
            _ => None,
        })
        .collect();

    json!({ "suggestions": suggestions })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
