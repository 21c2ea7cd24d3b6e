//! Network infrastructure - connectivity monitoring

mod monitor;

pub use monitor::NetworkMonitor;
