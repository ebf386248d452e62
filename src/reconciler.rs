use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    models::{JobKind, JobStatus, ResultSnapshot},
    transport::LastResultFetcher,
};

#[derive(Debug, Default)]
struct KindSnapshots {
    live: Option<ResultSnapshot>,
    cached: Option<ResultSnapshot>,
    refreshed_at: Option<DateTime<Utc>>,
    stale: bool,
    generation: u64,
}

#[derive(Debug)]
pub struct ResultReconciler {
    ttl: Duration,
    kinds: Mutex<HashMap<JobKind, KindSnapshots>>,
}

impl ResultReconciler {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            kinds: Mutex::new(HashMap::new()),
        }
    }

    fn kinds(&self) -> MutexGuard<'_, HashMap<JobKind, KindSnapshots>> {
        self.kinds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_live(&self, kind: JobKind, payload: Value) {
        self.kinds().entry(kind).or_default().live = Some(ResultSnapshot::live(kind, payload));
    }

    pub fn clear_live(&self, kind: JobKind) {
        if let Some(entry) = self.kinds().get_mut(&kind) {
            entry.live = None;
        }
    }

    pub fn promote(&self, kind: JobKind, payload: Value) {
        let mut kinds = self.kinds();
        let entry = kinds.entry(kind).or_default();
        entry.generation += 1;
        entry.live = None;
        entry.cached = Some(ResultSnapshot::cached(kind, payload));
        entry.refreshed_at = Some(Utc::now());
        entry.stale = false;
    }

    pub fn live(&self, kind: JobKind) -> Option<ResultSnapshot> {
        self.kinds().get(&kind).and_then(|entry| entry.live.clone())
    }

    pub fn cached(&self, kind: JobKind) -> Option<ResultSnapshot> {
        self.kinds().get(&kind).and_then(|entry| entry.cached.clone())
    }

    /// The existing snapshot stays visible until a refresh replaces it.
    pub fn mark_stale(&self, kind: JobKind) {
        let mut kinds = self.kinds();
        let entry = kinds.entry(kind).or_default();
        entry.generation += 1;
        entry.stale = true;
    }

    fn generation(&self, kind: JobKind) -> u64 {
        self.kinds().get(&kind).map_or(0, |entry| entry.generation)
    }

    pub fn needs_refresh(&self, kind: JobKind) -> bool {
        let kinds = self.kinds();
        let Some(entry) = kinds.get(&kind) else {
            return true;
        };
        if entry.stale {
            return true;
        }
        match entry.refreshed_at {
            None => true,
            Some(at) => {
                let age = (Utc::now() - at).to_std().unwrap_or(Duration::ZERO);
                age >= self.ttl
            }
        }
    }

    /// Reloads the cached snapshot from the last-result collaborator. A failed
    /// or empty fetch keeps what is cached, and a fetch that was overtaken by
    /// `promote` or `mark_stale` is dropped.
    pub async fn refresh_cached(&self, kind: JobKind, fetcher: &dyn LastResultFetcher) {
        let issued_at = self.generation(kind);
        let fetched = fetcher.fetch_last_result(kind).await;

        let mut kinds = self.kinds();
        let entry = kinds.entry(kind).or_default();
        if entry.generation != issued_at {
            debug!(kind = %kind, "Discarding superseded last-result fetch");
            return;
        }
        match fetched {
            Ok(Some(payload)) if !payload.is_null() => {
                debug!(kind = %kind, "Cached result refreshed");
                entry.cached = Some(ResultSnapshot::cached(kind, payload));
                entry.refreshed_at = Some(Utc::now());
                entry.stale = false;
            }
            Ok(_) => {
                debug!(kind = %kind, "No previous result on server");
                entry.refreshed_at = Some(Utc::now());
                entry.stale = false;
            }
            Err(err) => {
                warn!(kind = %kind, "Failed to refresh last result: {err}");
            }
        }
    }

    /// Live wins while a job is active, falling back to cached before the
    /// first live payload.
    pub fn active_result(&self, kind: JobKind, status: JobStatus) -> Option<ResultSnapshot> {
        let kinds = self.kinds();
        let entry = kinds.get(&kind)?;
        if status.is_active() {
            entry.live.clone().or_else(|| entry.cached.clone())
        } else {
            entry.cached.clone()
        }
    }
}
