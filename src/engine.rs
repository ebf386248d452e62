//! Job lifecycle engine: single-flight tracking per kind, polling to
//! completion, live/cached result reconciliation and exactly-once
//! completion fan-out.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    completion::{self, Completion},
    error::{EngineError, TransportError},
    events::LifecycleSink,
    invalidation::{last_result_key, InvalidationBus},
    models::{JobFailure, JobId, JobKind, JobRecord, JobStatus, JobView, StartRequest},
    poller::{PollControl, PollTarget, PollingCoordinator, DEFAULT_POLL_INTERVAL},
    reconciler::ResultReconciler,
    retry::{RetryDecision, RetryPolicy, DEFAULT_RETRY_LIMIT},
    store::{JobStore, StartOutcome},
    transport::{CacheSink, Collaborators},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub retry_limit: u32,
    pub last_result_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_limit: DEFAULT_RETRY_LIMIT,
            last_result_ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: JobStore,
    poller: PollingCoordinator,
    reconciler: Arc<ResultReconciler>,
    bus: InvalidationBus,
    retry: RetryPolicy,
    events: Arc<dyn LifecycleSink>,
    collaborators: Collaborators,
}

/// Marks the cached snapshot stale when its `last-result:<kind>` key is
/// invalidated, so the next idle read refetches it.
struct ReconcilerCacheSink(Arc<ResultReconciler>);

impl CacheSink for ReconcilerCacheSink {
    fn invalidate(&self, cache_key: &str) {
        for kind in JobKind::ALL {
            if cache_key == last_result_key(kind) {
                self.0.mark_stale(kind);
            }
        }
    }
}

impl JobEngine {
    pub fn new(
        settings: EngineSettings,
        collaborators: Collaborators,
        events: Arc<dyn LifecycleSink>,
        cache_sink: Arc<dyn CacheSink>,
    ) -> Self {
        let reconciler = Arc::new(ResultReconciler::new(settings.last_result_ttl));
        let sinks: Vec<Arc<dyn CacheSink>> = vec![
            cache_sink,
            Arc::new(ReconcilerCacheSink(reconciler.clone())),
        ];
        let bus = InvalidationBus::new(sinks);
        Self {
            inner: Arc::new(EngineInner {
                store: JobStore::new(),
                poller: PollingCoordinator::new(settings.poll_interval),
                reconciler,
                bus,
                retry: RetryPolicy::new(settings.retry_limit),
                events,
                collaborators,
            }),
        }
    }

    /// Asks the server to start a job of `kind` and begins tracking it.
    pub async fn start(
        &self,
        kind: JobKind,
        request: &StartRequest,
    ) -> Result<JobRecord, EngineError> {
        if let Some(existing) = self.inner.store.get(kind).filter(JobRecord::is_active) {
            return Err(EngineError::AlreadyActive(Box::new(existing)));
        }

        let started = self
            .inner
            .collaborators
            .starter
            .start_job(kind, request)
            .await
            .map_err(|source| EngineError::Start { kind, source })?;

        let Some(id) = started.id.filter(|id| !id.as_str().trim().is_empty()) else {
            warn!(kind = %kind, "Start request returned no job id");
            return Err(EngineError::NoJobStarted(kind));
        };

        self.track(kind, id)
    }

    /// Begins tracking a job that was started elsewhere.
    pub fn track(&self, kind: JobKind, id: JobId) -> Result<JobRecord, EngineError> {
        let record = match self.inner.store.start(kind, id) {
            StartOutcome::Started(record) => record,
            StartOutcome::AlreadyActive(existing) => {
                return Err(EngineError::AlreadyActive(Box::new(existing)));
            }
        };

        self.inner.reconciler.clear_live(kind);
        self.inner.bus.forget(kind);
        self.inner.events.on_started(kind, &record.id);
        self.inner.poller.attach(
            kind,
            record.id.clone(),
            self.inner.collaborators.fetcher.clone(),
            self.inner.clone(),
        );
        Ok(record)
    }

    /// Cancels an active job on the client side; the record stays `stopped`
    /// until reset or replaced.
    pub fn stop(&self, kind: JobKind) -> Result<JobRecord, EngineError> {
        self.inner.poller.detach(kind);
        let record = self.inner.store.transition(kind, JobStatus::Stopped, None)?;
        self.inner.reconciler.clear_live(kind);
        self.inner.events.on_stopped(kind, &record.id);
        Ok(record)
    }

    /// Clears the slot for `kind`. Responses still in flight for the
    /// previous job are dropped on arrival.
    pub fn reset(&self, kind: JobKind) -> Option<JobRecord> {
        self.inner.poller.detach(kind);
        self.inner.reconciler.clear_live(kind);
        self.inner.store.reset(kind)
    }

    pub fn record(&self, kind: JobKind) -> Option<JobRecord> {
        self.inner.store.get(kind)
    }

    pub fn status(&self, kind: JobKind) -> JobStatus {
        self.inner.store.status(kind)
    }

    pub fn is_polling(&self, kind: JobKind) -> bool {
        self.inner.poller.is_polling(kind)
    }

    /// What a consumer should render for `kind`. While no job is active the
    /// cached snapshot is refreshed from the server on demand.
    pub async fn view(&self, kind: JobKind) -> JobView {
        let status = self.status(kind);
        if !status.is_active() && self.inner.reconciler.needs_refresh(kind) {
            self.inner
                .reconciler
                .refresh_cached(kind, self.inner.collaborators.last_result.as_ref())
                .await;
        }

        // Re-read: a job may have started while the refresh was in flight.
        let record = self.inner.store.get(kind);
        let status = record
            .as_ref()
            .map(|record| record.status)
            .unwrap_or(JobStatus::Pending);
        JobView {
            kind,
            status,
            processing: status.is_active(),
            result: self.inner.reconciler.active_result(kind, status),
            record,
        }
    }

    pub fn shutdown(&self) {
        self.inner.poller.detach_all();
    }
}

impl EngineInner {
    fn complete(&self, kind: JobKind, id: &JobId, payload: Value) -> PollControl {
        if let Err(err) = self
            .store
            .transition_job(kind, id, JobStatus::Completed, None)
        {
            debug!(kind = %kind, job_id = %id, "Ignoring completion: {err}");
            return PollControl::Stop;
        }

        self.reconciler.promote(kind, payload.clone());
        if self.bus.on_job_completed(kind, id) {
            self.events.on_completed(kind, id, &payload);
        }
        self.store.reset_job(kind, id);
        PollControl::Stop
    }

    fn fail(&self, kind: JobKind, id: &JobId, failure: JobFailure, consume: bool) -> PollControl {
        if let Err(err) =
            self.store
                .transition_job(kind, id, JobStatus::Failed, Some(failure.message.clone()))
        {
            debug!(kind = %kind, job_id = %id, "Ignoring failure: {err}");
            return PollControl::Stop;
        }

        self.reconciler.clear_live(kind);
        self.events.on_failed(kind, id, &failure);
        if consume {
            self.store.reset_job(kind, id);
        }
        PollControl::Stop
    }

    fn apply_payload(&self, kind: JobKind, id: &JobId, payload: Value) -> PollControl {
        if let Err(err) = self.store.record_success(kind, id) {
            debug!(kind = %kind, job_id = %id, "Discarding poll payload: {err}");
            return PollControl::Stop;
        }

        match completion::detect(kind, &payload) {
            Completion::Pending => {
                self.reconciler.set_live(kind, payload);
                PollControl::Continue
            }
            Completion::Complete => self.complete(kind, id, payload),
            Completion::Failed(message) => {
                self.fail(kind, id, JobFailure::rejected(message), false)
            }
        }
    }

    fn apply_error(&self, kind: JobKind, id: &JobId, error: TransportError) -> PollControl {
        let message = error.to_string();
        let attempts = match self.store.record_failure(kind, id, &message) {
            Ok(attempts) => attempts,
            Err(err) => {
                debug!(kind = %kind, job_id = %id, "Discarding poll error: {err}");
                return PollControl::Stop;
            }
        };

        match self.retry.decide(&error, attempts) {
            RetryDecision::Retry { attempts } => {
                warn!(
                    kind = %kind,
                    job_id = %id,
                    attempts,
                    limit = self.retry.limit,
                    "Transient poll failure, retrying: {message}"
                );
                PollControl::Continue
            }
            RetryDecision::Exhausted { attempts } => self.fail(
                kind,
                id,
                JobFailure::budget_exhausted(attempts, message),
                true,
            ),
            RetryDecision::Abort => self.fail(kind, id, JobFailure::rejected(message), false),
        }
    }
}

#[async_trait]
impl PollTarget for EngineInner {
    fn is_current(&self, kind: JobKind, id: &JobId) -> bool {
        self.store.is_current(kind, id)
    }

    async fn apply(
        &self,
        kind: JobKind,
        id: &JobId,
        outcome: Result<Value, TransportError>,
    ) -> PollControl {
        let control = match outcome {
            Ok(payload) => self.apply_payload(kind, id, payload),
            Err(error) => self.apply_error(kind, id, error),
        };
        if control == PollControl::Stop {
            info!(kind = %kind, job_id = %id, status = %self.store.status(kind), "Polling stopped");
        }
        control
    }
}
