//! Live-call error taxonomy

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a live-call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionErrorKind {
    NetworkError,
    Timeout,
    ServerError,
    RateLimited,
    InvalidApiKey,
    InsufficientQuota,
    Cancelled,
    UnknownError,
}

impl SuggestionErrorKind {
    /// Whether a queued request failing this way may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError
                | Self::Timeout
                | Self::ServerError
                | Self::RateLimited
                | Self::UnknownError
        )
    }

    /// Failures that must be surfaced and never requeued
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidApiKey | Self::InsufficientQuota)
    }

    pub fn should_back_off(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ServerError => "SERVER_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::InsufficientQuota => "INSUFFICIENT_QUOTA",
            Self::Cancelled => "CANCELLED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for SuggestionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the live-call collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct SuggestionError {
    pub kind: SuggestionErrorKind,
    pub message: String,
}

impl SuggestionError {
    pub fn new(kind: SuggestionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SuggestionErrorKind::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SuggestionErrorKind::Timeout, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(SuggestionErrorKind::ServerError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SuggestionErrorKind::RateLimited, message)
    }

    pub fn invalid_api_key(message: impl Into<String>) -> Self {
        Self::new(SuggestionErrorKind::InvalidApiKey, message)
    }

    pub fn insufficient_quota(message: impl Into<String>) -> Self {
        Self::new(SuggestionErrorKind::InsufficientQuota, message)
    }

    pub fn cancelled() -> Self {
        Self::new(SuggestionErrorKind::Cancelled, "Request was cancelled")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(SuggestionErrorKind::UnknownError, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == SuggestionErrorKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(SuggestionErrorKind::NetworkError.is_retryable());
        assert!(SuggestionErrorKind::Timeout.is_retryable());
        assert!(SuggestionErrorKind::ServerError.is_retryable());
        assert!(SuggestionErrorKind::RateLimited.is_retryable());
        assert!(SuggestionErrorKind::UnknownError.is_retryable());
    }

    #[test]
    fn test_terminal_kinds_are_not_retryable() {
        for kind in [
            SuggestionErrorKind::InvalidApiKey,
            SuggestionErrorKind::InsufficientQuota,
        ] {
            assert!(kind.is_terminal());
            assert!(!kind.is_retryable());
        }
    }

    #[test]
    fn test_cancelled_is_neither_retryable_nor_terminal() {
        let error = SuggestionError::cancelled();
        assert!(error.is_cancelled());
        assert!(!error.is_retryable());
        assert!(!error.is_terminal());
    }

    #[test]
    fn test_only_rate_limited_backs_off() {
        assert!(SuggestionErrorKind::RateLimited.should_back_off());
        assert!(!SuggestionErrorKind::ServerError.should_back_off());
    }

    #[test]
    fn test_kind_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&SuggestionErrorKind::InsufficientQuota).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_QUOTA\"");
    }

    #[test]
    fn test_display() {
        let error = SuggestionError::timeout("no response after 30s");
        assert_eq!(error.to_string(), "TIMEOUT: no response after 30s");
    }
}
