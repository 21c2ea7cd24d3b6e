//! Retry queue document: `queue_v2`
//!
//! v1 stored `{items: [{id, type, payload, subjectId, subjectName, timestamp,
//! retryCount, lastError}]}` with epoch-millisecond times and string errors.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{legacy_instant, legacy_subject_id};
use crate::domain::queue::{QueuedRequest, QueuedRequestId};
use crate::domain::storage::MigrationChain;
use crate::domain::DomainError;

pub const QUEUE_SCHEMA_VERSION: u32 = 2;

/// Persisted payload of the retry queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDocument {
    #[serde(default)]
    pub requests: Vec<QueuedRequest>,
}

pub fn queue_chain() -> MigrationChain {
    MigrationChain::new("queue", QUEUE_SCHEMA_VERSION).with_migration(
        1,
        "items with epoch millis to typed requests",
        queue_v1_to_v2,
    )
}

fn queue_v1_to_v2(value: Value) -> Result<Value, DomainError> {
    let items = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(DomainError::serialization("queue v1 'items' must be an array"))
            }
        },
        _ => return Err(DomainError::serialization("queue v1 must be an object")),
    };

    let requests: Vec<Value> = items.iter().filter_map(legacy_request).collect();
    Ok(json!({ "requests": requests }))
}

fn legacy_request(item: &Value) -> Option<Value> {
    let subject_id = legacy_subject_id(item.get("subjectId"))?;

    let id = item
        .get("id")
        .and_then(Value::as_str)
        .map(QueuedRequestId::new)
        .unwrap_or_else(QueuedRequestId::generate);

    let enqueued_at = legacy_instant(item.get("timestamp")).unwrap_or_default();

    let mut request = Map::new();
    request.insert("id".into(), json!(id));
    request.insert(
        "requestType".into(),
        item.get("type")
            .cloned()
            .unwrap_or_else(|| json!("reply_suggestions")),
    );
    request.insert(
        "payload".into(),
        item.get("payload").cloned().unwrap_or_else(|| json!({})),
    );
    request.insert("subjectId".into(), json!(subject_id));
    request.insert(
        "subjectLabel".into(),
        item.get("subjectName").cloned().unwrap_or_else(|| json!("")),
    );
    request.insert("enqueuedAt".into(), json!(enqueued_at));
    request.insert(
        "attemptCount".into(),
        json!(item.get("retryCount").and_then(Value::as_u64).unwrap_or(0)),
    );

    if let Some(error) = legacy_error(item.get("lastError")) {
        request.insert("lastError".into(), error);
    }

    Some(Value::Object(request))
}

fn legacy_error(error: Option<&Value>) -> Option<Value> {
    match error? {
        Value::String(message) => Some(json!({ "kind": "UNKNOWN_ERROR", "message": message })),
        Value::Object(map) if map.contains_key("kind") => Some(Value::Object(map.clone())),
        _ => None,
    }
}
