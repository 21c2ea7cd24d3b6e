//! Live provider calls and the queue worker that replays them

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::queue::{QueuedRequest, ReplySuggestionsPayload, RequestType, WorkOutcome, Worker};
use crate::domain::suggestion::{
    AuthParams, Subject, SuggestionError, SuggestionProvider, SuggestionResult,
};
use crate::infrastructure::cache::ResponseCache;

/// Calls the provider, turning an elapsed deadline into a `TIMEOUT` error
pub async fn call_with_timeout(
    provider: &dyn SuggestionProvider,
    subject: &Subject,
    message: &str,
    auth: &AuthParams,
    timeout: Duration,
) -> Result<SuggestionResult, SuggestionError> {
    match tokio::time::timeout(timeout, provider.generate(subject, message, auth)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SuggestionError::timeout(format!(
            "{} did not answer within {}s",
            provider.provider_name(),
            timeout.as_secs()
        ))),
    }
}

/// Replays queued reply-suggestion requests against the provider
#[derive(Debug)]
pub struct LiveCallWorker {
    provider: Arc<dyn SuggestionProvider>,
    cache: Arc<ResponseCache>,
    timeout: Duration,
}

impl LiveCallWorker {
    pub fn new(
        provider: Arc<dyn SuggestionProvider>,
        cache: Arc<ResponseCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            timeout,
        }
    }
}

#[async_trait]
impl Worker for LiveCallWorker {
    async fn process(&self, request: &QueuedRequest) -> Result<WorkOutcome, SuggestionError> {
        if request.request_type != RequestType::ReplySuggestions {
            return Err(SuggestionError::unknown(format!(
                "Unsupported request type '{}'",
                request.request_type
            )));
        }

        let payload = ReplySuggestionsPayload::from_value(&request.payload)
            .map_err(|e| SuggestionError::unknown(format!("Malformed payload: {}", e)))?;

        // A live call made after this request was queued already answered it
        if let Some(hit) = self.cache.get(&request.subject_id, &payload.message).await {
            if hit.created_at > request.enqueued_at {
                debug!(request_id = %request.id, "Fresher cache entry found, skipping live call");
                return Ok(WorkOutcome::AlreadySatisfied);
            }
        }

        let subject = Subject::new(request.subject_id.clone(), request.subject_label.clone());
        let result = call_with_timeout(
            self.provider.as_ref(),
            &subject,
            &payload.message,
            &payload.auth,
            self.timeout,
        )
        .await?;

        self.cache
            .put(&request.subject_id, &payload.message, result)
            .await;

        Ok(WorkOutcome::Completed)
    }
}
