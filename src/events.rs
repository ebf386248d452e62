use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::{JobFailure, JobId, JobKind},
    transport::CacheSink,
};

/// Receives lifecycle notifications. How they are displayed is up to the
/// subscriber.
pub trait LifecycleSink: Send + Sync {
    fn on_started(&self, kind: JobKind, id: &JobId);
    fn on_completed(&self, kind: JobKind, id: &JobId, payload: &Value);
    fn on_failed(&self, kind: JobKind, id: &JobId, failure: &JobFailure);
    fn on_stopped(&self, _kind: JobKind, _id: &JobId) {}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    JobStarted {
        kind: JobKind,
        job_id: JobId,
    },
    JobCompleted {
        kind: JobKind,
        job_id: JobId,
        payload: Value,
    },
    JobFailed {
        kind: JobKind,
        job_id: JobId,
        failure: JobFailure,
    },
    JobStopped {
        kind: JobKind,
        job_id: JobId,
    },
    CacheInvalidated {
        key: String,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::JobStopped { .. } => "job_stopped",
            Self::CacheInvalidated { .. } => "cache_invalidated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Fans lifecycle and cache-invalidation notices out to every subscriber of
/// the event stream.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    fn publish(&self, event: EngineEvent) {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            event,
        };
        // No subscribers is fine.
        let _ = self.tx.send(envelope);
    }
}

impl LifecycleSink for EventBroadcaster {
    fn on_started(&self, kind: JobKind, id: &JobId) {
        info!(kind = %kind, job_id = %id, "Job started");
        self.publish(EngineEvent::JobStarted {
            kind,
            job_id: id.clone(),
        });
    }

    fn on_completed(&self, kind: JobKind, id: &JobId, payload: &Value) {
        info!(kind = %kind, job_id = %id, "Job completed");
        self.publish(EngineEvent::JobCompleted {
            kind,
            job_id: id.clone(),
            payload: payload.clone(),
        });
    }

    fn on_failed(&self, kind: JobKind, id: &JobId, failure: &JobFailure) {
        warn!(kind = %kind, job_id = %id, reason = ?failure.reason, "Job failed: {}", failure.message);
        self.publish(EngineEvent::JobFailed {
            kind,
            job_id: id.clone(),
            failure: failure.clone(),
        });
    }

    fn on_stopped(&self, kind: JobKind, id: &JobId) {
        info!(kind = %kind, job_id = %id, "Job stopped");
        self.publish(EngineEvent::JobStopped {
            kind,
            job_id: id.clone(),
        });
    }
}

impl CacheSink for EventBroadcaster {
    fn invalidate(&self, cache_key: &str) {
        self.publish(EngineEvent::CacheInvalidated {
            key: cache_key.to_string(),
        });
    }
}
