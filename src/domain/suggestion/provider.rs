use std::fmt::Debug;

use async_trait::async_trait;

use super::{AuthParams, Subject, SuggestionError, SuggestionResult};

/// The remote AI call that turns a message into reply suggestions.
///
/// Implementations classify every failure into a [`SuggestionError`] kind;
/// the pipeline decides between caching, queueing and surfacing based on it.
#[async_trait]
pub trait SuggestionProvider: Send + Sync + Debug {
    async fn generate(
        &self,
        subject: &Subject,
        message: &str,
        auth: &AuthParams,
    ) -> Result<SuggestionResult, SuggestionError>;

    fn provider_name(&self) -> &'static str {
        "suggestion-provider"
    }
}
