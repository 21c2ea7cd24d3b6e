//! Infrastructure layer - Store, monitor, cache, queue and service implementations

pub mod cache;
pub mod logging;
pub mod network;
pub mod queue;
pub mod services;
pub mod storage;
