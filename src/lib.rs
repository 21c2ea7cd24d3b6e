//! Reply Pipeline
//!
//! An offline-first pipeline for AI reply suggestions with support for:
//! - Live calls routed by the current network status
//! - A bounded, TTL-based response cache keyed by subject and message
//! - A durable FIFO retry queue drained when connectivity returns
//! - Versioned persistence that degrades to memory when the store fails

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod pipeline;

pub use config::AppConfig;
pub use domain::{
    AuthParams, CacheEntry, CacheStats, ConnectionType, ConnectivityProbe, DomainError,
    DrainReport, Durability, Durable, DurableStore, NetworkEvent, NetworkSnapshot, NetworkStatus,
    QueueEvent, QueueStats, QueuedRequest, QueuedRequestId, ResultSource, Subject, SubjectId,
    Suggestion, SuggestionError, SuggestionErrorKind, SuggestionProvider, SuggestionRequest,
    SuggestionResult,
};
pub use infrastructure::logging::init_logging;
pub use infrastructure::services::GenerateOutcome;
pub use pipeline::{SuggestionPipeline, SuggestionPipelineBuilder};
