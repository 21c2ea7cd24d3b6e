//! Suggestion domain - requests, results and the live-call contract

mod entity;
mod error;
mod provider;

pub use entity::{
    AuthParams, ResultSource, Subject, SubjectId, Suggestion, SuggestionRequest, SuggestionResult,
};
pub use error::{SuggestionError, SuggestionErrorKind};
pub use provider::SuggestionProvider;

#[cfg(test)]
pub use provider::mock::MockSuggestionProvider;
