//! Per-subject call ordering
//!
//! Every call is issued a token from one monotonically increasing counter.
//! A result is applied only if its token is still the newest one issued
//! for its subject, so a slow early call can never overwrite the result
//! of a later one. Tokens are never reused, which keeps a forgotten
//! subject's stale calls from matching a later call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::suggestion::SubjectId;

#[derive(Debug)]
struct SubjectCalls<T> {
    issued: u64,
    applied: Option<(u64, T)>,
}

impl<T> Default for SubjectCalls<T> {
    fn default() -> Self {
        Self {
            issued: 0,
            applied: None,
        }
    }
}

/// Token issuer and last-initiated-wins result slot, per subject
#[derive(Debug)]
pub struct CallTokens<T> {
    next: AtomicU64,
    subjects: Mutex<HashMap<SubjectId, SubjectCalls<T>>>,
}

impl<T> Default for CallTokens<T> {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            subjects: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> CallTokens<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next token for a subject
    pub fn issue(&self, subject_id: &SubjectId) -> u64 {
        let mut subjects = self.lock();
        let token = self.next.fetch_add(1, Ordering::SeqCst);
        subjects.entry(subject_id.clone()).or_default().issued = token;
        token
    }

    /// Whether `token` is the newest token issued for the subject
    pub fn is_current(&self, subject_id: &SubjectId, token: u64) -> bool {
        self.lock()
            .get(subject_id)
            .is_some_and(|calls| calls.issued == token)
    }

    /// Stores `value` as the subject's result unless a newer call was issued.
    /// Returns false when the value was discarded as stale.
    pub fn apply(&self, subject_id: &SubjectId, token: u64, value: T) -> bool {
        let mut subjects = self.lock();

        let Some(calls) = subjects.get_mut(subject_id) else {
            return false;
        };

        if token != calls.issued {
            return false;
        }

        calls.applied = Some((token, value));
        true
    }

    /// The most recently applied result for a subject
    pub fn latest(&self, subject_id: &SubjectId) -> Option<T> {
        self.lock()
            .get(subject_id)
            .and_then(|calls| calls.applied.as_ref())
            .map(|(_, value)| value.clone())
    }

    /// Drops a subject's slot and its stored result; calls still in flight
    /// for it resolve as stale. Returns false when nothing was tracked.
    pub fn forget(&self, subject_id: &SubjectId) -> bool {
        self.lock().remove(subject_id).is_some()
    }

    /// Number of subjects currently tracked
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubjectId, SubjectCalls<T>>> {
        self.subjects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
