//! Network status monitor
//!
//! Holds the latest [`NetworkSnapshot`], derives [`NetworkStatus`] from it and
//! broadcasts every observation plus edge-triggered transitions.

use std::fmt;
use std::sync::{Arc, RwLock};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::network::{
    ConnectivityProbe, NetworkEvent, NetworkSnapshot, NetworkStatus, NetworkTransition,
};
use crate::domain::DomainError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct NetworkMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    current: RwLock<NetworkSnapshot>,
    events: broadcast::Sender<NetworkEvent>,
}

impl fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("current", &self.current())
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

impl NetworkMonitor {
    /// Creates a monitor seeded by an initial probe.
    ///
    /// A failed probe is logged and the monitor starts as connected with
    /// unknown reachability, which counts as online.
    pub async fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        let initial = match probe.probe().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Initial connectivity probe failed, assuming online");
                NetworkSnapshot::unknown()
            }
        };

        info!(status = %initial.status(), "Network monitor started");
        Self::with_snapshot(probe, initial)
    }

    /// Creates a monitor with a known initial snapshot, without probing
    pub fn with_snapshot(probe: Arc<dyn ConnectivityProbe>, initial: NetworkSnapshot) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            probe,
            current: RwLock::new(initial),
            events,
        }
    }

    pub fn current(&self) -> NetworkSnapshot {
        *self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> NetworkStatus {
        self.current().status()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Records a new observation and notifies subscribers.
    ///
    /// Returns the transition when the derived status changed.
    pub fn apply(&self, snapshot: NetworkSnapshot) -> Option<NetworkTransition> {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = current.status();
        *current = snapshot;

        // Sent under the write lock so subscribers observe snapshots in order
        let _ = self.events.send(NetworkEvent::Snapshot(snapshot));

        let transition = NetworkTransition::between(previous, snapshot.status());

        if let Some(transition) = transition {
            info!(
                from = %previous,
                to = %snapshot.status(),
                connection_type = ?snapshot.connection_type,
                "Network status changed"
            );
            let _ = self.events.send(NetworkEvent::Transition {
                transition,
                snapshot,
            });
        } else {
            debug!(status = %previous, "Network snapshot unchanged");
        }

        transition
    }

    /// Probes connectivity now and applies the result
    pub async fn refresh(&self) -> Result<NetworkSnapshot, DomainError> {
        let snapshot = self.probe.probe().await?;
        self.apply(snapshot);
        Ok(snapshot)
    }

    /// Subscribes to snapshots and transitions; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Feeds an OS event stream into [`NetworkMonitor::apply`] until it ends
    pub fn listen<S>(self: &Arc<Self>, stream: S) -> JoinHandle<()>
    where
        S: Stream<Item = NetworkSnapshot> + Send + 'static,
    {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut stream = Box::pin(stream);

            while let Some(snapshot) = stream.next().await {
                monitor.apply(snapshot);
            }

            debug!("Network event stream ended");
        })
    }
}
