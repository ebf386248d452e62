//! Boundary contracts the engine consumes. Timeouts and connection-level
//! retries belong to the implementations, not to the engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::TransportError,
    models::{JobId, JobKind, StartRequest, StartedJob},
};

#[async_trait]
pub trait ResultFetcher: Send + Sync {
    async fn fetch_result(&self, job_id: &JobId) -> Result<Value, TransportError>;
}

#[async_trait]
pub trait LastResultFetcher: Send + Sync {
    /// `Ok(None)` when the server has no previous run of this kind.
    async fn fetch_last_result(&self, kind: JobKind) -> Result<Option<Value>, TransportError>;
}

#[async_trait]
pub trait JobStarter: Send + Sync {
    async fn start_job(
        &self,
        kind: JobKind,
        request: &StartRequest,
    ) -> Result<StartedJob, TransportError>;
}

pub trait CacheSink: Send + Sync {
    fn invalidate(&self, cache_key: &str);
}

/// Transport collaborators wired into one engine.
#[derive(Clone)]
pub struct Collaborators {
    pub starter: Arc<dyn JobStarter>,
    pub fetcher: Arc<dyn ResultFetcher>,
    pub last_result: Arc<dyn LastResultFetcher>,
}

impl Collaborators {
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: JobStarter + ResultFetcher + LastResultFetcher + 'static,
    {
        Self {
            starter: client.clone(),
            fetcher: client.clone(),
            last_result: client,
        }
    }
}
