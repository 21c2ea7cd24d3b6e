//! Durable FIFO retry queue with a re-entrancy-safe drain loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::domain::clock::Clock;
use crate::domain::queue::{
    DrainReport, FailureDisposition, QueueEvent, QueueStats, QueuedRequest, QueuedRequestId,
    RequestType, RetryPolicy, Worker,
};
use crate::domain::storage::{Durability, Durable, MigrationChain};
use crate::domain::suggestion::SubjectId;
use crate::infrastructure::storage::{queue_chain, QueueDocument, SessionStore};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct QueueState {
    /// Sorted by `enqueued_at`, insertion order on ties
    requests: Vec<QueuedRequest>,
}

impl QueueState {
    fn insert(&mut self, request: QueuedRequest) {
        let index = self
            .requests
            .partition_point(|existing| existing.enqueued_at <= request.enqueued_at);
        self.requests.insert(index, request);
    }

    fn position(&self, id: &QueuedRequestId) -> Option<usize> {
        self.requests.iter().position(|request| &request.id == id)
    }

    fn document(&self) -> QueueDocument {
        QueueDocument {
            requests: self.requests.clone(),
        }
    }
}

/// Ends a pass even when its drain future is dropped midway: clears the
/// processing flag, then wakes callers that collapsed into the pass.
struct ProcessingGuard<'a> {
    processing: &'a AtomicBool,
    finished: &'a watch::Sender<Option<DrainReport>>,
    /// `None` until the pass completes; collapsed callers of an abandoned
    /// pass get an empty report
    report: Option<DrainReport>,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.processing.store(false, Ordering::SeqCst);
        self.finished.send_replace(self.report.take());
    }
}

/// Ordered list of requests that could not be served live.
///
/// Every mutation is flushed through the session store while the state lock
/// is held, so the persisted order always matches the in-memory order. The
/// worker runs without the lock; concurrent `enqueue`/`remove` calls proceed
/// during a drain.
#[derive(Debug)]
pub struct RetryQueue {
    state: Mutex<QueueState>,
    processing: AtomicBool,
    /// Report of the most recent pass, published when it ends
    finished: watch::Sender<Option<DrainReport>>,
    worker: Arc<dyn Worker>,
    session: Arc<SessionStore>,
    chain: MigrationChain,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    events: broadcast::Sender<QueueEvent>,
}

impl RetryQueue {
    pub fn new(
        worker: Arc<dyn Worker>,
        session: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (finished, _) = watch::channel(None);

        Self {
            state: Mutex::new(QueueState::default()),
            processing: AtomicBool::new(false),
            finished,
            worker,
            session,
            chain: queue_chain(),
            clock,
            policy,
            events,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Restores persisted requests; returns how many were loaded
    #[instrument(skip(self))]
    pub async fn load(&self) -> Durable<usize> {
        let restored = self.session.restore::<QueueDocument>(&self.chain).await;

        let mut state = self.state.lock().await;
        let mut requests = restored.payload.requests;
        requests.sort_by_key(|request| request.enqueued_at);
        state.requests = requests;

        info!(
            pending = state.requests.len(),
            from_version = ?restored.from_version,
            "Retry queue loaded"
        );

        Durable::new(state.requests.len(), restored.durability)
    }

    /// Appends a request; it is durable (or reported as not) once this returns
    pub async fn enqueue(
        &self,
        request_type: RequestType,
        payload: Value,
        subject_id: SubjectId,
        subject_label: impl Into<String>,
    ) -> Durable<QueuedRequestId> {
        self.enqueue_not_before(request_type, payload, subject_id, subject_label, None)
            .await
    }

    /// Appends a request that drains skip until `not_before`
    pub async fn enqueue_not_before(
        &self,
        request_type: RequestType,
        payload: Value,
        subject_id: SubjectId,
        subject_label: impl Into<String>,
        not_before: Option<DateTime<Utc>>,
    ) -> Durable<QueuedRequestId> {
        let mut request = QueuedRequest::new(
            request_type,
            payload,
            subject_id,
            subject_label,
            self.clock.now(),
        );
        request.not_before = not_before;
        let id = request.id.clone();

        let mut state = self.state.lock().await;

        debug!(
            request_id = %id,
            subject_id = %request.subject_id,
            request_type = %request.request_type,
            "Enqueuing request"
        );
        state.insert(request);

        let durability = self.session.persist(&self.chain, &state.document()).await;
        self.emit(QueueEvent::Enqueued(id.clone()));

        info!(request_id = %id, pending = state.requests.len(), %durability, "Request queued");
        Durable::new(id, durability)
    }

    /// Pending requests in FIFO order
    pub async fn list_pending(&self) -> Vec<QueuedRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn get(&self, id: &QueuedRequestId) -> Option<QueuedRequest> {
        let state = self.state.lock().await;
        state.position(id).map(|index| state.requests[index].clone())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.requests.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes a request; returns false when it was not queued
    pub async fn remove(&self, id: &QueuedRequestId) -> Durable<bool> {
        let mut state = self.state.lock().await;

        let Some(index) = state.position(id) else {
            return Durable::new(false, Durability::Persisted);
        };

        state.requests.remove(index);
        let durability = self.session.persist(&self.chain, &state.document()).await;
        self.emit(QueueEvent::Removed(id.clone()));

        debug!(request_id = %id, "Request removed from queue");
        Durable::new(true, durability)
    }

    pub async fn clear(&self) -> Durability {
        let mut state = self.state.lock().await;
        let cleared = state.requests.len();
        state.requests.clear();

        let durability = self.session.persist(&self.chain, &state.document()).await;
        self.emit(QueueEvent::Cleared);

        info!(cleared, "Retry queue cleared");
        durability
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;

        QueueStats {
            pending_count: state.requests.len(),
            oldest_enqueued_at: state.requests.first().map(|request| request.enqueued_at),
            is_processing: self.processing.load(Ordering::SeqCst),
        }
    }

    /// Subscribes to queue mutations; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Attempts every currently queued request once, in FIFO order.
    ///
    /// A call made while a pass is running starts no second pass: it waits
    /// for the running one to finish and returns that pass's report with
    /// `collapsed` set. One failing request never stops the pass; its attempt
    /// bookkeeping is persisted and the next request runs.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> DrainReport {
        // Subscribed before the flag check so the end of the running pass
        // cannot be missed
        let mut finished = self.finished.subscribe();

        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress, waiting for it to finish");
            let report = match finished.changed().await {
                Ok(()) => *finished.borrow_and_update(),
                Err(_) => None,
            };

            return DrainReport {
                collapsed: true,
                ..report.unwrap_or_default()
            };
        }
        let mut guard = ProcessingGuard {
            processing: &self.processing,
            finished: &self.finished,
            report: None,
        };

        let ids: Vec<QueuedRequestId> = {
            let state = self.state.lock().await;
            state.requests.iter().map(|request| request.id.clone()).collect()
        };

        if !ids.is_empty() {
            info!(pending = ids.len(), "Draining retry queue");
        }
        self.emit(QueueEvent::ProcessingStarted);

        let mut report = DrainReport::default();
        for id in &ids {
            self.attempt(id, &mut report).await;
        }

        guard.report = Some(report);
        drop(guard);
        self.emit(QueueEvent::ProcessingFinished(report));

        if !ids.is_empty() {
            info!(
                processed = report.processed,
                failed = report.failed,
                dropped = report.dropped,
                deferred = report.deferred,
                "Drain finished"
            );
        }

        report
    }

    async fn attempt(&self, id: &QueuedRequestId, report: &mut DrainReport) {
        let request = {
            let state = self.state.lock().await;
            match state.position(id) {
                Some(index) => state.requests[index].clone(),
                // Removed by the host since the pass started
                None => return,
            }
        };

        if !request.is_due(self.clock.now()) {
            debug!(request_id = %id, not_before = ?request.not_before, "Request backing off");
            report.deferred += 1;
            return;
        }

        let outcome = self.worker.process(&request).await;
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let index = state.position(id);

        match (outcome, index) {
            (Ok(outcome), Some(index)) => {
                state.requests.remove(index);
                report.processed += 1;

                let durability = self.session.persist(&self.chain, &state.document()).await;
                self.emit(QueueEvent::Removed(id.clone()));
                debug!(request_id = %id, ?outcome, %durability, "Queued request completed");
            }
            (Ok(_), None) => {
                report.processed += 1;
            }
            (Err(error), None) => {
                debug!(request_id = %id, error = %error, "Removed request failed in flight");
                report.failed += 1;
            }
            (Err(error), Some(index)) => {
                let attempts_after = state.requests[index].attempt_count + 1;

                match self.policy.classify(&error, attempts_after, now) {
                    FailureDisposition::Skip => {
                        debug!(request_id = %id, "Queued request attempt cancelled");
                        report.deferred += 1;
                    }
                    FailureDisposition::Retain { not_before } => {
                        state.requests[index].record_failure(error.clone(), now, not_before);
                        report.failed += 1;

                        self.session.persist(&self.chain, &state.document()).await;
                        self.emit(QueueEvent::Updated(id.clone()));
                        warn!(
                            request_id = %id,
                            attempts = attempts_after,
                            error = %error,
                            "Queued request failed, will retry"
                        );
                    }
                    disposition @ (FailureDisposition::DropTerminal
                    | FailureDisposition::DropExhausted) => {
                        state.requests.remove(index);
                        report.failed += 1;
                        report.dropped += 1;

                        self.session.persist(&self.chain, &state.document()).await;
                        self.emit(QueueEvent::Removed(id.clone()));
                        warn!(
                            request_id = %id,
                            attempts = attempts_after,
                            error = %error,
                            ?disposition,
                            "Queued request dropped"
                        );
                    }
                }
            }
        }
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}
