//! Retry eligibility for failed queue entries

use chrono::{DateTime, Duration, Utc};

use crate::domain::suggestion::{SuggestionError, SuggestionErrorKind};

/// What to do with an entry after the worker failed on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Keep for a later drain, optionally not before the given instant
    Retain { not_before: Option<DateTime<Utc>> },
    /// Remove; the error can never succeed on retry
    DropTerminal,
    /// Remove; the attempt ceiling was reached
    DropExhausted,
    /// Leave untouched; the attempt was deliberately aborted
    Skip,
}

/// Attempt ceilings and rate-limit back-off
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Ceiling for ordinary retryable failures
    pub max_attempts: u32,
    /// Lower ceiling for unclassified failures
    pub unknown_error_max_attempts: u32,
    /// First back-off after a rate-limit response
    pub rate_limit_backoff: Duration,
    /// Upper bound for the exponential back-off
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            unknown_error_max_attempts: 2,
            rate_limit_backoff: Duration::seconds(60),
            max_backoff: Duration::minutes(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_unknown_error_max_attempts(mut self, attempts: u32) -> Self {
        self.unknown_error_max_attempts = attempts;
        self
    }

    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    pub fn ceiling_for(&self, kind: SuggestionErrorKind) -> u32 {
        match kind {
            SuggestionErrorKind::UnknownError => self.unknown_error_max_attempts,
            _ => self.max_attempts,
        }
    }

    /// Back-off for the n-th consecutive rate limit (1-based), doubling each time
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 1i32 << exponent;
        let delay = self.rate_limit_backoff * factor;

        if delay > self.max_backoff {
            self.max_backoff
        } else {
            delay
        }
    }

    /// Decides the fate of an entry whose attempt count is about to
    /// become `attempts_after`
    pub fn classify(
        &self,
        error: &SuggestionError,
        attempts_after: u32,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        if error.is_cancelled() {
            return FailureDisposition::Skip;
        }

        if error.is_terminal() {
            return FailureDisposition::DropTerminal;
        }

        if attempts_after >= self.ceiling_for(error.kind) {
            return FailureDisposition::DropExhausted;
        }

        let not_before = error
            .kind
            .should_back_off()
            .then(|| now + self.backoff_for_attempt(attempts_after));

        FailureDisposition::Retain { not_before }
    }
}
