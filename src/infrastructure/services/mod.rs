//! Services - request coordination and queued-request replay

mod call_tokens;
mod coordinator;
mod live_call;

pub use call_tokens::CallTokens;
pub use coordinator::{CoordinatorConfig, GenerateOutcome, SuggestionCoordinator};
pub use live_call::{call_with_timeout, LiveCallWorker};
