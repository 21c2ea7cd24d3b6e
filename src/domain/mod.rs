//! Domain layer - Core types, contracts and errors of the suggestion pipeline

pub mod cache;
pub mod clock;
pub mod error;
pub mod network;
pub mod queue;
pub mod storage;
pub mod suggestion;

pub use cache::{normalize_message, CacheEntry, CacheKey, CacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use network::{
    ConnectionType, ConnectivityProbe, NetworkEvent, NetworkSnapshot, NetworkStatus,
    NetworkTransition,
};
pub use queue::{
    DrainReport, FailureDisposition, QueueEvent, QueueStats, QueuedRequest, QueuedRequestId,
    ReplySuggestionsPayload, RequestType, RetryPolicy, WorkOutcome, Worker,
};
pub use storage::{Durability, Durable, DurableStore, MigrationChain, VersionedDocument};
pub use suggestion::{
    AuthParams, ResultSource, Subject, SubjectId, Suggestion, SuggestionError,
    SuggestionErrorKind, SuggestionProvider, SuggestionRequest, SuggestionResult,
};
