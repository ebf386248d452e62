//! Scripted collaborators shared by unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    error::TransportError,
    events::{EngineEvent, LifecycleSink},
    models::{JobFailure, JobId, JobKind, StartRequest, StartedJob},
    transport::{CacheSink, JobStarter, LastResultFetcher, ResultFetcher},
};

/// Replays queued outcomes; answers `{"status": "pending"}` once the queue
/// runs dry.
pub struct ScriptedBackend {
    results: Mutex<VecDeque<Result<Value, TransportError>>>,
    fetch_delay: Mutex<Duration>,
    fetch_log: Mutex<Vec<JobId>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    last_results: Mutex<HashMap<JobKind, Result<Option<Value>, TransportError>>>,
    last_result_calls: AtomicUsize,
    last_result_delay: Mutex<Duration>,
    start_response: Mutex<Result<StartedJob, TransportError>>,
    start_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(VecDeque::new()),
            fetch_delay: Mutex::new(Duration::ZERO),
            fetch_log: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            last_results: Mutex::new(HashMap::new()),
            last_result_calls: AtomicUsize::new(0),
            last_result_delay: Mutex::new(Duration::ZERO),
            start_response: Mutex::new(Ok(StartedJob::default())),
            start_calls: AtomicUsize::new(0),
        })
    }

    pub fn push_result(&self, payload: Value) {
        self.results.lock().unwrap().push_back(Ok(payload));
    }

    pub fn push_error(&self, error: TransportError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_log.lock().unwrap().len()
    }

    pub fn fetches_for(&self, id: &JobId) -> usize {
        self.fetch_log
            .lock()
            .unwrap()
            .iter()
            .filter(|logged| *logged == id)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_last_result(&self, kind: JobKind, payload: Option<Value>) {
        self.last_results.lock().unwrap().insert(kind, Ok(payload));
    }

    pub fn fail_last_result(&self, kind: JobKind, message: &str) {
        self.last_results
            .lock()
            .unwrap()
            .insert(kind, Err(TransportError::Network(message.to_string())));
    }

    pub fn set_last_result_delay(&self, delay: Duration) {
        *self.last_result_delay.lock().unwrap() = delay;
    }

    pub fn last_result_calls(&self) -> usize {
        self.last_result_calls.load(Ordering::SeqCst)
    }

    pub fn set_start_response(&self, response: Result<StartedJob, TransportError>) {
        *self.start_response.lock().unwrap() = response;
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultFetcher for ScriptedBackend {
    async fn fetch_result(&self, job_id: &JobId) -> Result<Value, TransportError> {
        self.fetch_log.lock().unwrap().push(job_id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"status": "pending"})));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[async_trait]
impl LastResultFetcher for ScriptedBackend {
    async fn fetch_last_result(&self, kind: JobKind) -> Result<Option<Value>, TransportError> {
        self.last_result_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.last_result_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.last_results
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or(Ok(None))
    }
}

#[async_trait]
impl JobStarter for ScriptedBackend {
    async fn start_job(
        &self,
        _kind: JobKind,
        _request: &StartRequest,
    ) -> Result<StartedJob, TransportError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.start_response.lock().unwrap().clone()
    }
}

/// Records everything the engine emits.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn lifecycle(&self) -> Vec<EngineEvent> {
        self.events()
            .into_iter()
            .filter(|event| !matches!(event, EngineEvent::CacheInvalidated { .. }))
            .collect()
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                EngineEvent::CacheInvalidated { key } => Some(key),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl LifecycleSink for RecordingSink {
    fn on_started(&self, kind: JobKind, id: &JobId) {
        self.push(EngineEvent::JobStarted {
            kind,
            job_id: id.clone(),
        });
    }

    fn on_completed(&self, kind: JobKind, id: &JobId, payload: &Value) {
        self.push(EngineEvent::JobCompleted {
            kind,
            job_id: id.clone(),
            payload: payload.clone(),
        });
    }

    fn on_failed(&self, kind: JobKind, id: &JobId, failure: &JobFailure) {
        self.push(EngineEvent::JobFailed {
            kind,
            job_id: id.clone(),
            failure: failure.clone(),
        });
    }

    fn on_stopped(&self, kind: JobKind, id: &JobId) {
        self.push(EngineEvent::JobStopped {
            kind,
            job_id: id.clone(),
        });
    }
}

impl CacheSink for RecordingSink {
    fn invalidate(&self, cache_key: &str) {
        self.push(EngineEvent::CacheInvalidated {
            key: cache_key.to_string(),
        });
    }
}
