//! Network domain - connectivity snapshots and transitions

mod probe;
mod snapshot;

pub use probe::ConnectivityProbe;
pub use snapshot::{
    ConnectionType, NetworkEvent, NetworkSnapshot, NetworkStatus, NetworkTransition,
};

#[cfg(test)]
pub use probe::MockConnectivityProbe;
