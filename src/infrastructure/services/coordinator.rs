//! Request coordinator
//!
//! Decides, per suggestion request, between the live call, the response
//! cache and the retry queue:
//!
//! - offline: cache hit, otherwise defer into the queue
//! - online or weak: live call with timeout, written through to the cache
//! - retryable failure: defer into the queue and fall back to the cache
//! - terminal failure: fall back to the cache, otherwise surface the error
//!
//! Concurrent calls for the same subject and message share one live call.
//! Results are applied last-initiated-wins per subject.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::call_tokens::CallTokens;
use super::live_call::call_with_timeout;
use crate::domain::cache::CacheKey;
use crate::domain::clock::Clock;
use crate::domain::network::{NetworkEvent, NetworkTransition};
use crate::domain::queue::{QueuedRequestId, ReplySuggestionsPayload, RequestType};
use crate::domain::suggestion::{
    ResultSource, SubjectId, SuggestionError, SuggestionProvider, SuggestionRequest,
    SuggestionResult,
};
use crate::infrastructure::cache::ResponseCache;
use crate::infrastructure::network::NetworkMonitor;
use crate::infrastructure::queue::RetryQueue;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound for one live call
    pub live_call_timeout: Duration,
    /// Share one live call between concurrent identical requests
    pub deduplicate_in_flight: bool,
    /// Drain the retry queue when connectivity comes back
    pub drain_on_reconnect: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            live_call_timeout: Duration::from_secs(30),
            deduplicate_in_flight: true,
            drain_on_reconnect: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_live_call_timeout(mut self, timeout: Duration) -> Self {
        self.live_call_timeout = timeout;
        self
    }

    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate_in_flight = enabled;
        self
    }

    pub fn with_drain_on_reconnect(mut self, enabled: bool) -> Self {
        self.drain_on_reconnect = enabled;
        self
    }
}

/// What a `generate` call produced
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOutcome {
    /// Suggestions to show, `None` when the request was only deferred
    pub result: Option<SuggestionResult>,
    pub source: ResultSource,
    /// Live-call failure that led to a cache or queue answer
    pub error: Option<SuggestionError>,
    /// Set when the request was deferred into the retry queue
    pub queued_id: Option<QueuedRequestId>,
    /// Per-subject call token
    pub token: u64,
    /// A newer call for the same subject was issued before this one resolved
    pub superseded: bool,
}

impl GenerateOutcome {
    pub fn is_queued(&self) -> bool {
        self.queued_id.is_some()
    }
}

/// Outcome shared by every caller joined on one live call
#[derive(Debug, Clone)]
struct Decision {
    result: Option<SuggestionResult>,
    source: ResultSource,
    error: Option<SuggestionError>,
    queued_id: Option<QueuedRequestId>,
}

impl Decision {
    fn live(result: SuggestionResult) -> Self {
        Self {
            result: Some(result),
            source: ResultSource::Live,
            error: None,
            queued_id: None,
        }
    }

    fn cached(
        result: SuggestionResult,
        error: Option<SuggestionError>,
        queued_id: Option<QueuedRequestId>,
    ) -> Self {
        Self {
            result: Some(result),
            source: ResultSource::Cache,
            error,
            queued_id,
        }
    }

    fn queued(queued_id: QueuedRequestId, error: Option<SuggestionError>) -> Self {
        Self {
            result: None,
            source: ResultSource::Queued,
            error,
            queued_id: Some(queued_id),
        }
    }

    fn into_outcome(self, token: u64) -> GenerateOutcome {
        GenerateOutcome {
            result: self.result,
            source: self.source,
            error: self.error,
            queued_id: self.queued_id,
            token,
            superseded: false,
        }
    }
}

type SharedDecision = Shared<BoxFuture<'static, Result<Decision, SuggestionError>>>;

struct InFlight {
    call_id: u64,
    decision: SharedDecision,
    cancel: CancellationToken,
    waiters: usize,
}

type InFlightMap = Arc<Mutex<HashMap<CacheKey, InFlight>>>;

fn lock_in_flight(map: &InFlightMap) -> MutexGuard<'_, HashMap<CacheKey, InFlight>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A caller's handle on a (possibly shared) live call
struct Joined {
    key: CacheKey,
    call_id: u64,
    decision: SharedDecision,
    cancel: CancellationToken,
    shared: bool,
}

/// Everything a live-call task needs, detached from the coordinator
#[derive(Debug, Clone)]
struct LiveCallContext {
    provider: Arc<dyn SuggestionProvider>,
    cache: Arc<ResponseCache>,
    queue: Arc<RetryQueue>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl LiveCallContext {
    async fn run(
        self,
        request: SuggestionRequest,
        cancel: CancellationToken,
    ) -> Result<Decision, SuggestionError> {
        let subject_id = request.subject.id.clone();

        let live = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SuggestionError::cancelled()),
            outcome = call_with_timeout(
                self.provider.as_ref(),
                &request.subject,
                &request.message,
                &request.auth,
                self.timeout,
            ) => outcome,
        };

        match live {
            Ok(result) => {
                let durability = self
                    .cache
                    .put(&subject_id, &request.message, result.clone())
                    .await;
                debug!(subject_id = %subject_id, %durability, "Live result cached");
                Ok(Decision::live(result))
            }
            Err(error) if error.is_cancelled() => Err(error),
            Err(error) if error.is_terminal() => {
                warn!(subject_id = %subject_id, error = %error, "Live call failed, not retrying");

                match self.cache.get(&subject_id, &request.message).await {
                    Some(hit) => Ok(Decision::cached(hit.result, Some(error), None)),
                    None => Err(error),
                }
            }
            Err(error) => {
                if cancel.is_cancelled() {
                    return Err(SuggestionError::cancelled());
                }

                warn!(subject_id = %subject_id, error = %error, "Live call failed, deferring");

                let not_before = error
                    .kind
                    .should_back_off()
                    .then(|| self.clock.now() + self.queue.policy().backoff_for_attempt(1));
                let queued_id = self.enqueue(&request, not_before).await?;

                // Cancelled while the enqueue was being flushed
                if cancel.is_cancelled() {
                    let removed = self.queue.remove(&queued_id).await;
                    debug!(
                        request_id = %queued_id,
                        removed = removed.value,
                        "Call cancelled during enqueue, request withdrawn"
                    );
                    return Err(SuggestionError::cancelled());
                }

                Ok(match self.cache.get(&subject_id, &request.message).await {
                    Some(hit) => Decision::cached(hit.result, Some(error), Some(queued_id)),
                    None => Decision::queued(queued_id, Some(error)),
                })
            }
        }
    }

    async fn enqueue(
        &self,
        request: &SuggestionRequest,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<QueuedRequestId, SuggestionError> {
        let payload = ReplySuggestionsPayload::from_request(request)
            .to_value()
            .map_err(|e| SuggestionError::unknown(format!("Failed to encode request: {}", e)))?;

        let queued = self
            .queue
            .enqueue_not_before(
                RequestType::ReplySuggestions,
                payload,
                request.subject.id.clone(),
                request.subject.label.clone(),
                not_before,
            )
            .await;

        Ok(queued.into_inner())
    }
}

struct Listener {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Orchestrates the live call, the response cache and the retry queue
pub struct SuggestionCoordinator {
    live: LiveCallContext,
    network: Arc<NetworkMonitor>,
    config: CoordinatorConfig,
    tokens: CallTokens<GenerateOutcome>,
    in_flight: InFlightMap,
    next_call_id: AtomicU64,
    listener: Mutex<Option<Listener>>,
}

impl fmt::Debug for SuggestionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuggestionCoordinator")
            .field("provider", &self.live.provider.provider_name())
            .field("network", &self.network.status())
            .field("config", &self.config)
            .field("in_flight", &lock_in_flight(&self.in_flight).len())
            .finish()
    }
}

impl SuggestionCoordinator {
    pub fn new(
        provider: Arc<dyn SuggestionProvider>,
        network: Arc<NetworkMonitor>,
        cache: Arc<ResponseCache>,
        queue: Arc<RetryQueue>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            live: LiveCallContext {
                provider,
                cache,
                queue,
                clock,
                timeout: config.live_call_timeout,
            },
            network,
            config,
            tokens: CallTokens::new(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_call_id: AtomicU64::new(1),
            listener: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.live.cache
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.live.queue
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    /// Produces suggestions for a request; see the module docs for the decision table
    pub async fn generate(
        &self,
        request: SuggestionRequest,
    ) -> Result<GenerateOutcome, SuggestionError> {
        self.generate_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`generate`](Self::generate), aborted with `CANCELLED` once
    /// `cancel` fires. A cancelled call leaves nothing queued: a request it
    /// was already writing is withdrawn before `CANCELLED` is returned, and a
    /// call that had already finished returns its outcome instead.
    #[instrument(skip(self, request, cancel), fields(subject_id = %request.subject.id))]
    pub async fn generate_with_cancel(
        &self,
        request: SuggestionRequest,
        cancel: CancellationToken,
    ) -> Result<GenerateOutcome, SuggestionError> {
        let subject_id = request.subject.id.clone();
        let token = self.tokens.issue(&subject_id);

        if cancel.is_cancelled() {
            return Err(SuggestionError::cancelled());
        }

        let status = self.network.status();
        let decision = if status.allows_live_call() {
            self.live_decision(request, &cancel).await?
        } else {
            debug!(%status, "Offline, answering from cache or queue");
            self.offline_decision(request).await?
        };

        let mut outcome = decision.into_outcome(token);
        outcome.superseded = !self.tokens.apply(&subject_id, token, outcome.clone());

        if outcome.superseded {
            debug!(token, "Newer call issued for subject, result not applied");
        }

        Ok(outcome)
    }

    /// Last applied outcome for a subject (last-initiated wins)
    pub fn latest_result(&self, subject_id: &SubjectId) -> Option<GenerateOutcome> {
        self.tokens.latest(subject_id)
    }

    /// Stops tracking a subject, dropping its latest result. Calls for it
    /// still in flight resolve as superseded.
    pub fn forget_subject(&self, subject_id: &SubjectId) -> bool {
        let forgotten = self.tokens.forget(subject_id);
        debug!(subject_id = %subject_id, forgotten, "Subject forgotten");
        forgotten
    }

    /// Number of subjects with a tracked latest result or pending call
    pub fn tracked_subjects(&self) -> usize {
        self.tokens.len()
    }

    async fn offline_decision(
        &self,
        request: SuggestionRequest,
    ) -> Result<Decision, SuggestionError> {
        if let Some(hit) = self
            .live
            .cache
            .get(&request.subject.id, &request.message)
            .await
        {
            return Ok(Decision::cached(hit.result, None, None));
        }

        let queued_id = self.live.enqueue(&request, None).await?;
        Ok(Decision::queued(queued_id, None))
    }

    async fn live_decision(
        &self,
        request: SuggestionRequest,
        cancel: &CancellationToken,
    ) -> Result<Decision, SuggestionError> {
        let joined = self.join_or_start(request);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if !self.release(&joined) {
                    return Err(SuggestionError::cancelled());
                }

                // The aborted call may be mid-way through a queue write; wait
                // until it has settled. A call that already finished keeps its
                // result.
                match joined.decision.clone().await {
                    Ok(decision) => Ok(decision),
                    Err(_) => Err(SuggestionError::cancelled()),
                }
            }
            decision = joined.decision.clone() => decision,
        }
    }

    fn join_or_start(&self, request: SuggestionRequest) -> Joined {
        let key = CacheKey::derive(&request.subject.id, &request.message);

        if !self.config.deduplicate_in_flight {
            let call_id = self.next_call_id.fetch_add(1, Ordering::SeqCst);
            let cancel = CancellationToken::new();
            let decision = self.spawn_live_call(request, cancel.clone(), None);

            return Joined {
                key,
                call_id,
                decision,
                cancel,
                shared: false,
            };
        }

        let mut in_flight = lock_in_flight(&self.in_flight);

        if let Some(entry) = in_flight.get_mut(&key) {
            entry.waiters += 1;
            debug!(key = %key, waiters = entry.waiters, "Joining in-flight live call");

            return Joined {
                key,
                call_id: entry.call_id,
                decision: entry.decision.clone(),
                cancel: entry.cancel.clone(),
                shared: true,
            };
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let decision =
            self.spawn_live_call(request, cancel.clone(), Some((key.clone(), call_id)));

        in_flight.insert(
            key.clone(),
            InFlight {
                call_id,
                decision: decision.clone(),
                cancel: cancel.clone(),
                waiters: 1,
            },
        );

        Joined {
            key,
            call_id,
            decision,
            cancel,
            shared: true,
        }
    }

    fn spawn_live_call(
        &self,
        request: SuggestionRequest,
        cancel: CancellationToken,
        registration: Option<(CacheKey, u64)>,
    ) -> SharedDecision {
        let live = self.live.clone();
        let in_flight = Arc::clone(&self.in_flight);

        let handle = tokio::spawn(async move {
            let decision = live.run(request, cancel).await;

            if let Some((key, call_id)) = registration {
                let mut in_flight = lock_in_flight(&in_flight);
                if in_flight.get(&key).is_some_and(|entry| entry.call_id == call_id) {
                    in_flight.remove(&key);
                }
            }

            decision
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(SuggestionError::unknown(format!("Live call task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    /// Drops one waiter; the live call is cancelled once nobody waits for it.
    /// Returns true when this release cancelled the call.
    fn release(&self, joined: &Joined) -> bool {
        if !joined.shared {
            joined.cancel.cancel();
            return true;
        }

        let mut in_flight = lock_in_flight(&self.in_flight);

        let Some(entry) = in_flight.get_mut(&joined.key) else {
            // Finished and unregistered; settle on its result
            joined.cancel.cancel();
            return true;
        };

        if entry.call_id != joined.call_id {
            joined.cancel.cancel();
            return true;
        }

        entry.waiters = entry.waiters.saturating_sub(1);

        if entry.waiters == 0 {
            debug!(key = %joined.key, "Last waiter cancelled, aborting live call");
            entry.cancel.cancel();
            in_flight.remove(&joined.key);
            return true;
        }

        false
    }

    /// Starts the reconnect listener: drains the queue once at startup when
    /// online, then on every transition back online.
    pub fn start(&self) {
        if !self.config.drain_on_reconnect {
            return;
        }

        let mut listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if listener.is_some() {
            return;
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(reconnect_loop(
            Arc::clone(&self.network),
            Arc::clone(&self.live.queue),
            self.network.subscribe(),
            shutdown.clone(),
        ));

        *listener = Some(Listener { shutdown, handle });
        debug!("Reconnect listener started");
    }

    /// Stops the reconnect listener and cancels in-flight live calls
    pub async fn shutdown(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(listener) = listener {
            listener.shutdown.cancel();
            if let Err(e) = listener.handle.await {
                warn!(error = %e, "Reconnect listener ended abnormally");
            }
        }

        for (_, entry) in lock_in_flight(&self.in_flight).drain() {
            entry.cancel.cancel();
        }

        info!("Suggestion coordinator stopped");
    }
}

async fn reconnect_loop(
    network: Arc<NetworkMonitor>,
    queue: Arc<RetryQueue>,
    mut events: broadcast::Receiver<NetworkEvent>,
    shutdown: CancellationToken,
) {
    if network.is_online() && !queue.is_empty().await {
        let report = queue.drain().await;
        info!(processed = report.processed, failed = report.failed, "Startup drain finished");
    }

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(NetworkEvent::Transition {
                transition: NetworkTransition::BecameOnline,
                ..
            }) => {
                info!("Connectivity restored, draining retry queue");
                let report = queue.drain().await;
                debug!(?report, "Reconnect drain finished");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Reconnect listener lagged behind network events");
                if network.is_online() {
                    queue.drain().await;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    debug!("Reconnect listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::domain::clock::ManualClock;
    use crate::domain::network::{ConnectionType, MockConnectivityProbe, NetworkSnapshot};
    use crate::domain::queue::{QueueEvent, RetryPolicy};
    use crate::domain::storage::{DurableStore, MockDurableStore};
    use crate::domain::suggestion::{MockSuggestionProvider, Subject, SuggestionErrorKind};
    use crate::infrastructure::cache::ResponseCacheConfig;
    use crate::infrastructure::services::LiveCallWorker;
    use crate::infrastructure::storage::SessionStore;

    struct Fixture {
        coordinator: SuggestionCoordinator,
        provider: Arc<MockSuggestionProvider>,
        network: Arc<NetworkMonitor>,
        cache: Arc<ResponseCache>,
        queue: Arc<RetryQueue>,
        session: Arc<SessionStore>,
    }

    fn fixture_with(
        provider: MockSuggestionProvider,
        snapshot: NetworkSnapshot,
        store: Arc<dyn DurableStore>,
        config: CoordinatorConfig,
    ) -> Fixture {
        let provider = Arc::new(provider);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let session = Arc::new(SessionStore::new(store));
        let network = Arc::new(NetworkMonitor::with_snapshot(
            Arc::new(MockConnectivityProbe::new()),
            snapshot,
        ));
        let cache = Arc::new(ResponseCache::new(
            session.clone(),
            clock.clone(),
            ResponseCacheConfig::default(),
        ));
        let worker = Arc::new(LiveCallWorker::new(
            provider.clone(),
            cache.clone(),
            config.live_call_timeout,
        ));
        let queue = Arc::new(RetryQueue::new(
            worker,
            session.clone(),
            clock.clone(),
            RetryPolicy::default(),
        ));
        let coordinator = SuggestionCoordinator::new(
            provider.clone(),
            network.clone(),
            cache.clone(),
            queue.clone(),
            clock,
            config,
        );

        Fixture {
            coordinator,
            provider,
            network,
            cache,
            queue,
            session,
        }
    }

    fn fixture(provider: MockSuggestionProvider, snapshot: NetworkSnapshot) -> Fixture {
        fixture_with(
            provider,
            snapshot,
            Arc::new(MockDurableStore::new()),
            CoordinatorConfig::default(),
        )
    }

    fn online() -> NetworkSnapshot {
        NetworkSnapshot::online(ConnectionType::Wifi)
    }

    fn request(subject: &str, message: &str) -> SuggestionRequest {
        SuggestionRequest::new(Subject::new(subject, "Dana"), message)
    }

    fn result(text: &str) -> SuggestionResult {
        SuggestionResult::from_texts([text])
    }

    #[tokio::test]
    async fn test_online_success_is_live_and_cached() {
        let f = fixture(MockSuggestionProvider::new().with_result(result("On my way")), online());

        let outcome = f.coordinator.generate(request("1", "where are you?")).await.unwrap();

        assert_eq!(outcome.source, ResultSource::Live);
        assert_eq!(outcome.result, Some(result("On my way")));
        assert!(outcome.error.is_none());
        assert!(f.cache.get(&SubjectId::from("1"), "where are you?").await.is_some());
    }

    #[tokio::test]
    async fn test_offline_cache_miss_is_queued() {
        let f = fixture(MockSuggestionProvider::new(), NetworkSnapshot::offline());

        let outcome = f.coordinator.generate(request("1", "you up?")).await.unwrap();

        assert_eq!(outcome.source, ResultSource::Queued);
        assert!(outcome.result.is_none());
        assert!(outcome.error.is_none());
        assert!(outcome.queued_id.is_some());
        assert_eq!(f.queue.stats().await.pending_count, 1);
        assert_eq!(f.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_cache_hit_served_from_cache() {
        let f = fixture(MockSuggestionProvider::new(), NetworkSnapshot::offline());
        f.cache.put(&SubjectId::from("1"), "you up?", result("Yes")).await;

        let outcome = f.coordinator.generate(request("1", "You up?")).await.unwrap();

        assert_eq!(outcome.source, ResultSource::Cache);
        assert_eq!(outcome.result, Some(result("Yes")));
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_network_error_with_stale_cache_returns_cache_and_enqueues() {
        let f = fixture(
            MockSuggestionProvider::new().with_error(SuggestionError::network("connection reset")),
            online(),
        );
        f.cache.put(&SubjectId::from("1"), "dinner?", result("Stale")).await;

        let outcome = f.coordinator.generate(request("1", "dinner?")).await.unwrap();

        assert_eq!(outcome.source, ResultSource::Cache);
        assert_eq!(outcome.result, Some(result("Stale")));
        assert_eq!(
            outcome.error.as_ref().map(|e| e.kind),
            Some(SuggestionErrorKind::NetworkError)
        );
        assert!(outcome.queued_id.is_some());
        assert_eq!(f.queue.stats().await.pending_count, 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_without_cache_is_queued_with_error() {
        let f = fixture(
            MockSuggestionProvider::new().with_error(SuggestionError::server("503")),
            online(),
        );

        let outcome = f.coordinator.generate(request("1", "dinner?")).await.unwrap();

        assert_eq!(outcome.source, ResultSource::Queued);
        assert!(outcome.result.is_none());
        assert_eq!(
            outcome.error.map(|e| e.kind),
            Some(SuggestionErrorKind::ServerError)
        );
        assert_eq!(f.queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_request_queued_with_back_off() {
        let f = fixture(
            MockSuggestionProvider::new().with_error(SuggestionError::rate_limited("429")),
            online(),
        );

        f.coordinator.generate(request("1", "dinner?")).await.unwrap();

        let pending = f.queue.list_pending().await;
        assert_eq!(pending.len(), 1);
        assert!(pending[0].not_before.is_some());
    }

    #[tokio::test]
    async fn test_terminal_failure_surfaced_and_not_queued() {
        let f = fixture(
            MockSuggestionProvider::new().with_error(SuggestionError::invalid_api_key("401")),
            online(),
        );

        let error = f.coordinator.generate(request("1", "dinner?")).await.unwrap_err();

        assert_eq!(error.kind, SuggestionErrorKind::InvalidApiKey);
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_terminal_failure_with_cache_hit_returns_cache() {
        let f = fixture(
            MockSuggestionProvider::new()
                .with_error(SuggestionError::insufficient_quota("quota exceeded")),
            online(),
        );
        f.cache.put(&SubjectId::from("1"), "dinner?", result("Cached")).await;

        let outcome = f.coordinator.generate(request("1", "dinner?")).await.unwrap();

        assert_eq!(outcome.source, ResultSource::Cache);
        assert_eq!(
            outcome.error.map(|e| e.kind),
            Some(SuggestionErrorKind::InsufficientQuota)
        );
        assert!(outcome.queued_id.is_none());
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let f = fixture_with(
            MockSuggestionProvider::new().with_delay(Duration::from_secs(60)),
            online(),
            Arc::new(MockDurableStore::new()),
            CoordinatorConfig::default().with_live_call_timeout(Duration::from_secs(5)),
        );

        let outcome = f.coordinator.generate(request("1", "hello")).await.unwrap();

        assert_eq!(outcome.source, ResultSource::Queued);
        assert_eq!(outcome.error.map(|e| e.kind), Some(SuggestionErrorKind::Timeout));
        assert_eq!(f.queue.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_does_not_enqueue() {
        let provider = MockSuggestionProvider::new();
        provider.push_reply(
            Err(SuggestionError::network("dropped")),
            Duration::from_millis(200),
        );
        let f = fixture(provider, online());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let error = f
            .coordinator
            .generate_with_cancel(request("1", "hello"), cancel)
            .await
            .unwrap_err();
        assert!(error.is_cancelled());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_slow_enqueue_withdraws_request() {
        let provider = MockSuggestionProvider::new();
        provider.push_reply(
            Err(SuggestionError::network("dropped")),
            Duration::from_millis(10),
        );
        let store = Arc::new(MockDurableStore::new().with_save_delay(Duration::from_millis(100)));
        let f = fixture_with(provider, online(), store.clone(), CoordinatorConfig::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let error = f
            .coordinator
            .generate_with_cancel(request("1", "hello"), cancel)
            .await
            .unwrap_err();

        assert!(error.is_cancelled());
        assert!(f.queue.is_empty().await);

        let persisted: serde_json::Value =
            serde_json::from_str(&store.raw("queue_v2").unwrap()).unwrap();
        assert_eq!(persisted["payload"]["requests"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_forget_subject_releases_latest_result() {
        let f = fixture(MockSuggestionProvider::new(), online());
        let subject = SubjectId::from("1");

        f.coordinator.generate(request("1", "hello")).await.unwrap();
        f.coordinator.generate(request("2", "hello")).await.unwrap();
        assert!(f.coordinator.latest_result(&subject).is_some());
        assert_eq!(f.coordinator.tracked_subjects(), 2);

        assert!(f.coordinator.forget_subject(&subject));
        assert!(f.coordinator.latest_result(&subject).is_none());
        assert_eq!(f.coordinator.tracked_subjects(), 1);

        let outcome = f.coordinator.generate(request("1", "again")).await.unwrap();
        assert!(!outcome.superseded);
        assert!(f.coordinator.latest_result(&subject).is_some());
    }

    #[tokio::test]
    async fn test_already_cancelled_token_short_circuits() {
        let f = fixture(MockSuggestionProvider::new(), online());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = f
            .coordinator
            .generate_with_cancel(request("1", "hello"), cancel)
            .await
            .unwrap_err();

        assert_eq!(error.kind, SuggestionErrorKind::Cancelled);
        assert_eq!(f.provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_initiated_call_wins() {
        let provider = MockSuggestionProvider::new();
        provider.push_reply(Ok(result("slow first")), Duration::from_millis(100));
        provider.push_reply(Ok(result("fast second")), Duration::from_millis(10));
        let f = fixture(provider, online());
        let coordinator = Arc::new(f.coordinator);

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.generate(request("1", "first message")).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let second = coordinator
            .generate(request("1", "second message"))
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(first.token < second.token);
        assert!(first.superseded);
        assert!(!second.superseded);

        let latest = coordinator.latest_result(&SubjectId::from("1")).unwrap();
        assert_eq!(latest.result, Some(result("fast second")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_requests_share_live_call() {
        let f = fixture(
            MockSuggestionProvider::new().with_delay(Duration::from_millis(50)),
            online(),
        );

        let (a, b) = tokio::join!(
            f.coordinator.generate(request("1", "same")),
            f.coordinator.generate(request("1", "Same "))
        );

        assert_eq!(a.unwrap().source, ResultSource::Live);
        assert_eq!(b.unwrap().source, ResultSource::Live);
        assert_eq!(f.provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deduplication_can_be_disabled() {
        let f = fixture_with(
            MockSuggestionProvider::new().with_delay(Duration::from_millis(50)),
            online(),
            Arc::new(MockDurableStore::new()),
            CoordinatorConfig::default().with_deduplication(false),
        );

        let (a, b) = tokio::join!(
            f.coordinator.generate(request("1", "same")),
            f.coordinator.generate(request("1", "same"))
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(f.provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_cancelled_waiter_does_not_abort_shared_call() {
        let f = fixture(
            MockSuggestionProvider::new().with_delay(Duration::from_millis(100)),
            online(),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let (cancelled, kept) = tokio::join!(
            f.coordinator
                .generate_with_cancel(request("1", "same"), cancel),
            f.coordinator.generate(request("1", "same"))
        );

        assert!(cancelled.unwrap_err().is_cancelled());
        assert_eq!(kept.unwrap().source, ResultSource::Live);
        assert_eq!(f.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_triggers_exactly_one_drain() {
        let f = fixture(MockSuggestionProvider::new(), NetworkSnapshot::offline());
        f.coordinator.start();

        f.coordinator.generate(request("1", "first")).await.unwrap();
        f.coordinator.generate(request("2", "second")).await.unwrap();
        assert_eq!(f.queue.len().await, 2);

        let mut events = f.queue.subscribe();
        f.network.apply(online());

        let mut finished = 0;
        let wait = tokio::time::timeout(Duration::from_secs(5), async {
            while let Ok(event) = events.recv().await {
                if let QueueEvent::ProcessingFinished(report) = event {
                    finished += 1;
                    assert_eq!(report.processed, 2);
                    break;
                }
            }
        })
        .await;
        assert!(wait.is_ok());

        // A repeated online snapshot is not a transition and must not drain again
        f.network.apply(online());
        tokio::time::sleep(Duration::from_millis(50)).await;

        while let Ok(event) = events.try_recv() {
            if matches!(event, QueueEvent::ProcessingFinished(_)) {
                finished += 1;
            }
        }

        assert_eq!(finished, 1);
        assert_eq!(f.provider.call_count(), 2);
        assert!(f.queue.is_empty().await);
        assert!(f.cache.get(&SubjectId::from("1"), "first").await.is_some());

        f.coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_reconnect_drains() {
        let f = fixture(MockSuggestionProvider::new(), NetworkSnapshot::offline());
        f.coordinator.start();

        f.coordinator.generate(request("1", "first")).await.unwrap();
        f.coordinator.shutdown().await;

        f.network.apply(online());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.provider.call_count(), 0);
        assert_eq!(f.queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_degrades_but_generate_succeeds() {
        let f = fixture_with(
            MockSuggestionProvider::new(),
            online(),
            Arc::new(MockDurableStore::new().with_failing_writes()),
            CoordinatorConfig::default(),
        );

        let outcome = f.coordinator.generate(request("1", "hello")).await.unwrap();

        assert_eq!(outcome.source, ResultSource::Live);
        assert!(f.session.is_degraded());
        assert!(f.cache.get(&SubjectId::from("1"), "hello").await.is_some());
    }
}
