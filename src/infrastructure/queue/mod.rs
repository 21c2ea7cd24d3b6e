//! Queue infrastructure - the persisted retry queue

mod retry_queue;

pub use retry_queue::RetryQueue;
