use std::fmt::Debug;

use async_trait::async_trait;

use super::QueuedRequest;
use crate::domain::suggestion::SuggestionError;

/// How a worker satisfied a queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The live call ran and its result was stored
    Completed,
    /// A result newer than the request was already cached; no live call made
    AlreadySatisfied,
}

/// Processes one queued request during a drain pass
#[async_trait]
pub trait Worker: Send + Sync + Debug {
    async fn process(&self, request: &QueuedRequest) -> Result<WorkOutcome, SuggestionError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::domain::queue::QueuedRequestId;

    /// Mock worker recording the order it saw requests in
    #[derive(Debug, Default)]
    pub struct MockWorker {
        seen: Mutex<Vec<QueuedRequestId>>,
        messages: Mutex<Vec<String>>,
        failures: Mutex<Vec<(QueuedRequestId, SuggestionError)>>,
        fail_all: Mutex<Option<SuggestionError>>,
        delay: Mutex<Duration>,
        calls: AtomicUsize,
    }

    impl MockWorker {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fails every request
        pub fn failing_with(self, error: SuggestionError) -> Self {
            *self.fail_all.lock().unwrap() = Some(error);
            self
        }

        pub fn with_delay(self, delay: Duration) -> Self {
            *self.delay.lock().unwrap() = delay;
            self
        }

        /// Fails only the given request
        pub fn fail_on(&self, id: &QueuedRequestId, error: SuggestionError) {
            self.failures.lock().unwrap().push((id.clone(), error));
        }

        pub fn clear_failures(&self) {
            self.failures.lock().unwrap().clear();
            *self.fail_all.lock().unwrap() = None;
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn seen(&self) -> Vec<QueuedRequestId> {
            self.seen.lock().unwrap().clone()
        }

        /// `payload.message` of every processed request, in call order
        pub fn seen_messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }

        pub fn distinct_seen(&self) -> usize {
            self.seen.lock().unwrap().iter().collect::<HashSet<_>>().len()
        }
    }

    #[async_trait]
    impl Worker for MockWorker {
        async fn process(&self, request: &QueuedRequest) -> Result<WorkOutcome, SuggestionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.id.clone());

            if let Some(message) = request.payload.get("message").and_then(|m| m.as_str()) {
                self.messages.lock().unwrap().push(message.to_string());
            }

            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let Some(error) = self.fail_all.lock().unwrap().clone() {
                return Err(error);
            }

            let failure = self
                .failures
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _)| id == &request.id)
                .map(|(_, error)| error.clone());

            match failure {
                Some(error) => Err(error),
                None => Ok(WorkOutcome::Completed),
            }
        }
    }
}
