//! Queued request entity and queue read models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::suggestion::{AuthParams, SubjectId, SuggestionError, SuggestionRequest};
use crate::domain::DomainError;

/// Identifier assigned at enqueue time: `req-{uuid}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueuedRequestId(String);

impl QueuedRequestId {
    pub fn generate() -> Self {
        Self(format!("req-{}", uuid::Uuid::new_v4()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueuedRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of deferred work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Generate reply suggestions for an incoming message
    ReplySuggestions,
    /// Anything written by a newer build this one does not understand
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplySuggestions => write!(f, "reply_suggestions"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Payload of a `ReplySuggestions` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySuggestionsPayload {
    pub message: String,
    #[serde(default)]
    pub auth: AuthParams,
}

impl ReplySuggestionsPayload {
    pub fn from_request(request: &SuggestionRequest) -> Self {
        Self {
            message: request.message.clone(),
            auth: request.auth.clone(),
        }
    }

    pub fn to_value(&self) -> Result<Value, DomainError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, DomainError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// A pending request that could not be served live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: QueuedRequestId,
    pub request_type: RequestType,
    #[serde(default)]
    pub payload: Value,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub subject_label: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SuggestionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Back-off window; the entry is skipped by drains until then
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
}

impl QueuedRequest {
    pub fn new(
        request_type: RequestType,
        payload: Value,
        subject_id: SubjectId,
        subject_label: impl Into<String>,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: QueuedRequestId::generate(),
            request_type,
            payload,
            subject_id,
            subject_label: subject_label.into(),
            enqueued_at,
            attempt_count: 0,
            last_error: None,
            last_attempt_at: None,
            not_before: None,
        }
    }

    /// Whether a drain at `now` should attempt this entry
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|not_before| now >= not_before)
    }

    /// Records a failed attempt
    pub fn record_failure(
        &mut self,
        error: SuggestionError,
        at: DateTime<Utc>,
        not_before: Option<DateTime<Utc>>,
    ) {
        self.attempt_count += 1;
        self.last_error = Some(error);
        self.last_attempt_at = Some(at);
        self.not_before = not_before;
    }
}

/// Derived, read-only queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending_count: usize,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    pub is_processing: bool,
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Entries the worker completed (removed)
    pub processed: usize,
    /// Entries the worker failed on, retained or dropped
    pub failed: usize,
    /// Failed entries removed for good (terminal error or attempt ceiling)
    pub dropped: usize,
    /// Entries skipped this pass (back-off window, cancelled work)
    pub deferred: usize,
    /// True when this call joined a pass already in progress
    pub collapsed: bool,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.processed + self.failed
    }
}

/// Mutation notification broadcast to queue subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Enqueued(QueuedRequestId),
    Removed(QueuedRequestId),
    Updated(QueuedRequestId),
    Cleared,
    ProcessingStarted,
    ProcessingFinished(DrainReport),
}
