//! Queue domain - deferred suggestion requests and their processing contract

mod entity;
mod policy;
mod worker;

pub use entity::{
    DrainReport, QueueEvent, QueueStats, QueuedRequest, QueuedRequestId, ReplySuggestionsPayload,
    RequestType,
};
pub use policy::{FailureDisposition, RetryPolicy};
pub use worker::{WorkOutcome, Worker};

#[cfg(test)]
pub use worker::mock::MockWorker;
