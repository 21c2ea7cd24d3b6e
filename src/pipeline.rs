//! Library entry point assembling the offline-first suggestion pipeline

use std::sync::Arc;

use futures::Stream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::domain::cache::{CacheEntry, CacheStats};
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::network::{
    ConnectivityProbe, NetworkEvent, NetworkSnapshot, NetworkStatus, NetworkTransition,
};
use crate::domain::queue::{
    DrainReport, QueueEvent, QueueStats, QueuedRequest, QueuedRequestId, Worker,
};
use crate::domain::storage::{Durability, Durable, DurableStore};
use crate::domain::suggestion::{
    SubjectId, SuggestionError, SuggestionProvider, SuggestionRequest,
};
use crate::domain::DomainError;
use crate::infrastructure::cache::ResponseCache;
use crate::infrastructure::network::NetworkMonitor;
use crate::infrastructure::queue::RetryQueue;
use crate::infrastructure::services::{GenerateOutcome, LiveCallWorker, SuggestionCoordinator};
use crate::infrastructure::storage::{SessionStore, StorageFactory};

/// Builder for [`SuggestionPipeline`]
pub struct SuggestionPipelineBuilder {
    config: AppConfig,
    provider: Arc<dyn SuggestionProvider>,
    probe: Arc<dyn ConnectivityProbe>,
    store: Option<Arc<dyn DurableStore>>,
    clock: Option<Arc<dyn Clock>>,
    worker: Option<Arc<dyn Worker>>,
}

impl SuggestionPipelineBuilder {
    /// Uses an existing store instead of the configured backend
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the worker that replays queued requests
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Opens the store, restores cache and queue, probes connectivity and
    /// starts the reconnect listener
    pub async fn build(self) -> Result<SuggestionPipeline, DomainError> {
        let config = self.config;
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => StorageFactory::create(&config.storage.storage_config()?).await?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let session = Arc::new(SessionStore::new(store));

        let network = Arc::new(NetworkMonitor::new(self.probe).await);

        let cache = Arc::new(ResponseCache::new(
            session.clone(),
            clock.clone(),
            config.cache.cache_config(),
        ));
        cache.load().await;

        let coordinator_config = config.coordinator.coordinator_config();

        let worker = match self.worker {
            Some(worker) => worker,
            None => Arc::new(LiveCallWorker::new(
                self.provider.clone(),
                cache.clone(),
                coordinator_config.live_call_timeout,
            )),
        };

        let queue = Arc::new(RetryQueue::new(
            worker,
            session.clone(),
            clock.clone(),
            config.queue.retry_policy(),
        ));
        queue.load().await;

        let coordinator = SuggestionCoordinator::new(
            self.provider,
            network.clone(),
            cache.clone(),
            queue.clone(),
            clock,
            coordinator_config,
        );
        coordinator.start();

        info!(
            network = %network.status(),
            cached = cache.stats().await.size,
            pending = queue.stats().await.pending_count,
            degraded = session.is_degraded(),
            "Suggestion pipeline ready"
        );

        Ok(SuggestionPipeline {
            coordinator,
            network,
            cache,
            queue,
            session,
        })
    }
}

/// Offline-first reply suggestion pipeline
///
/// Owns the network monitor, the response cache, the retry queue and the
/// coordinator that routes requests between them.
#[derive(Debug)]
pub struct SuggestionPipeline {
    coordinator: SuggestionCoordinator,
    network: Arc<NetworkMonitor>,
    cache: Arc<ResponseCache>,
    queue: Arc<RetryQueue>,
    session: Arc<SessionStore>,
}

impl SuggestionPipeline {
    pub fn builder(
        config: AppConfig,
        provider: Arc<dyn SuggestionProvider>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> SuggestionPipelineBuilder {
        SuggestionPipelineBuilder {
            config,
            provider,
            probe,
            store: None,
            clock: None,
            worker: None,
        }
    }

    pub async fn generate(
        &self,
        request: SuggestionRequest,
    ) -> Result<GenerateOutcome, SuggestionError> {
        self.coordinator.generate(request).await
    }

    pub async fn generate_with_cancel(
        &self,
        request: SuggestionRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateOutcome, SuggestionError> {
        self.coordinator.generate_with_cancel(request, cancel).await
    }

    /// Last applied outcome for a subject
    pub fn latest_result(&self, subject_id: &SubjectId) -> Option<GenerateOutcome> {
        self.coordinator.latest_result(subject_id)
    }

    /// Drops the latest-result slot kept for a subject, e.g. when its
    /// conversation is closed
    pub fn forget_subject(&self, subject_id: &SubjectId) -> bool {
        self.coordinator.forget_subject(subject_id)
    }

    pub async fn get_cached_results_for(&self, subject_id: &SubjectId) -> Vec<CacheEntry> {
        self.cache.get_cached_results_for(subject_id).await
    }

    pub async fn clear_cache(&self) -> Durability {
        self.cache.clear().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn list_pending_requests(&self) -> Vec<QueuedRequest> {
        self.queue.list_pending().await
    }

    pub async fn remove_from_queue(&self, id: &QueuedRequestId) -> Durable<bool> {
        self.queue.remove(id).await
    }

    pub async fn clear_queue(&self) -> Durability {
        self.queue.clear().await
    }

    /// Drains the queue now; collapsed into a running pass if one is active
    pub async fn drain_queue_now(&self) -> DrainReport {
        self.queue.drain().await
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.network.status()
    }

    pub async fn refresh_network(&self) -> Result<NetworkSnapshot, DomainError> {
        self.network.refresh().await
    }

    /// Feeds one OS connectivity event into the monitor
    pub fn apply_network_snapshot(&self, snapshot: NetworkSnapshot) -> Option<NetworkTransition> {
        self.network.apply(snapshot)
    }

    /// Feeds a stream of OS connectivity events into the monitor
    pub fn listen_network<S>(&self, events: S) -> JoinHandle<()>
    where
        S: Stream<Item = NetworkSnapshot> + Send + 'static,
    {
        self.network.listen(events)
    }

    /// True once a store failure has switched this session to memory-only
    pub fn is_durability_degraded(&self) -> bool {
        self.session.is_degraded()
    }

    pub fn subscribe_queue(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    pub fn subscribe_network(&self) -> broadcast::Receiver<NetworkEvent> {
        self.network.subscribe()
    }

    /// Stops background work; pending requests stay queued for the next session
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
