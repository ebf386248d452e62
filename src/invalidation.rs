use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::debug;

use crate::{
    models::{JobId, JobKind},
    transport::CacheSink,
};

pub const HISTORY_KEY: &str = "history";

pub fn last_result_key(kind: JobKind) -> String {
    format!("last-result:{kind}")
}

pub fn history_partition_key(kind: JobKind) -> String {
    format!("{HISTORY_KEY}:{}", kind.history_partition())
}

/// Cache keys made stale by a completed job of `kind`.
pub fn keys_for(kind: JobKind) -> Vec<String> {
    vec![
        last_result_key(kind),
        HISTORY_KEY.to_string(),
        history_partition_key(kind),
    ]
}

/// Publishes invalidation notices once per completed job.
pub struct InvalidationBus {
    sinks: Vec<Arc<dyn CacheSink>>,
    last_completed: Mutex<HashMap<JobKind, JobId>>,
}

impl InvalidationBus {
    pub fn new(sinks: Vec<Arc<dyn CacheSink>>) -> Self {
        Self {
            sinks,
            last_completed: Mutex::new(HashMap::new()),
        }
    }

    /// Returns false when this job's completion was already published.
    pub fn on_job_completed(&self, kind: JobKind, id: &JobId) -> bool {
        {
            let mut last = self
                .last_completed
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.get(&kind) == Some(id) {
                debug!(kind = %kind, job_id = %id, "Duplicate completion ignored");
                return false;
            }
            last.insert(kind, id.clone());
        }

        for key in keys_for(kind) {
            debug!(kind = %kind, job_id = %id, cache_key = %key, "Invalidating cache");
            for sink in &self.sinks {
                sink.invalidate(&key);
            }
        }
        true
    }

    /// Called when a new polling session begins for `kind`.
    pub fn forget(&self, kind: JobKind) {
        self.last_completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    #[test]
    fn keys_cover_last_result_and_history() {
        assert_eq!(
            keys_for(JobKind::FindIssues),
            vec!["last-result:find_issues", "history", "history:findings"]
        );
        assert_eq!(
            keys_for(JobKind::CatalogAi),
            vec!["last-result:catalog_ai", "history", "history:catalog"]
        );
    }

    #[test]
    fn completion_fans_out_once_per_job() {
        let sink = Arc::new(RecordingSink::default());
        let sinks: Vec<Arc<dyn CacheSink>> = vec![sink.clone()];
        let bus = InvalidationBus::new(sinks);
        let id = JobId::from("J1");

        assert!(bus.on_job_completed(JobKind::FindIssues, &id));
        assert!(!bus.on_job_completed(JobKind::FindIssues, &id));
        assert_eq!(sink.invalidated().len(), 3);

        assert!(bus.on_job_completed(JobKind::FindIssues, &JobId::from("J2")));
        assert!(bus.on_job_completed(JobKind::CatalogAi, &id));
        assert_eq!(sink.invalidated().len(), 9);
    }

    #[test]
    fn forget_allows_same_id_to_publish_again() {
        let sink = Arc::new(RecordingSink::default());
        let sinks: Vec<Arc<dyn CacheSink>> = vec![sink.clone()];
        let bus = InvalidationBus::new(sinks);
        let id = JobId::from("J1");

        assert!(bus.on_job_completed(JobKind::CatalogAi, &id));
        bus.forget(JobKind::CatalogAi);
        assert!(bus.on_job_completed(JobKind::CatalogAi, &id));
        assert_eq!(sink.invalidated().len(), 6);
    }
}
