//! Connectivity snapshot and derived status

use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical link type reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    None,
    #[default]
    Unknown,
}

/// One observation of device connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    pub is_connected: bool,
    /// `None` when reachability has not been determined yet
    pub is_internet_reachable: Option<bool>,
    pub connection_type: ConnectionType,
}

impl NetworkSnapshot {
    pub fn online(connection_type: ConnectionType) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
            connection_type,
        }
    }

    /// Connected to a link that cannot reach the internet
    pub fn weak(connection_type: ConnectionType) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(false),
            connection_type,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: Some(false),
            connection_type: ConnectionType::None,
        }
    }

    /// Connected but reachability not probed yet
    pub fn unknown() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: None,
            connection_type: ConnectionType::Unknown,
        }
    }

    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable != Some(false)
    }

    pub fn is_weak(&self) -> bool {
        self.is_connected && self.is_internet_reachable == Some(false)
    }

    pub fn is_offline(&self) -> bool {
        !self.is_connected
    }

    pub fn status(&self) -> NetworkStatus {
        if self.is_offline() {
            NetworkStatus::Offline
        } else if self.is_weak() {
            NetworkStatus::Weak
        } else {
            NetworkStatus::Online
        }
    }
}

/// Three-way classification of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Weak,
    Offline,
}

impl NetworkStatus {
    /// Whether a live call should be attempted; weak links are tried and may time out
    pub fn allows_live_call(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Weak => write!(f, "weak"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Edge-triggered status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTransition {
    BecameOnline,
    BecameWeak,
    BecameOffline,
}

impl NetworkTransition {
    /// Transition into `to`, or `None` when the status did not change
    pub fn between(from: NetworkStatus, to: NetworkStatus) -> Option<Self> {
        if from == to {
            return None;
        }

        Some(match to {
            NetworkStatus::Online => Self::BecameOnline,
            NetworkStatus::Weak => Self::BecameWeak,
            NetworkStatus::Offline => Self::BecameOffline,
        })
    }
}

/// Event broadcast by the network monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Every observed snapshot, including unchanged ones
    Snapshot(NetworkSnapshot),
    /// Only emitted when the derived status changes
    Transition {
        transition: NetworkTransition,
        snapshot: NetworkSnapshot,
    },
}
