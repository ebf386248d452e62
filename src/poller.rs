//! One cancellable polling task per job kind. A fetch in flight when the
//! task is cancelled runs to completion and its outcome is dropped.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::TransportError,
    models::{JobId, JobKind},
    transport::ResultFetcher,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Continue,
    Stop,
}

#[async_trait]
pub trait PollTarget: Send + Sync {
    fn is_current(&self, kind: JobKind, id: &JobId) -> bool;

    async fn apply(
        &self,
        kind: JobKind,
        id: &JobId,
        outcome: Result<Value, TransportError>,
    ) -> PollControl;
}

struct PollTask {
    job_id: JobId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PollingCoordinator {
    interval: Duration,
    tasks: Mutex<HashMap<JobKind, PollTask>>,
}

impl PollingCoordinator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<JobKind, PollTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces any task attached to `kind`.
    pub fn attach(
        &self,
        kind: JobKind,
        job_id: JobId,
        fetcher: Arc<dyn ResultFetcher>,
        target: Arc<dyn PollTarget>,
    ) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            kind,
            job_id.clone(),
            self.interval,
            fetcher,
            target,
            cancel.clone(),
        ));

        let previous = self.tasks().insert(
            kind,
            PollTask {
                job_id: job_id.clone(),
                cancel,
                handle,
            },
        );
        if let Some(previous) = previous {
            debug!(kind = %kind, job_id = %previous.job_id, "Replacing poll task");
            previous.cancel.cancel();
        }
        info!(kind = %kind, job_id = %job_id, interval_ms = self.interval.as_millis() as u64, "Polling attached");
    }

    /// Cancels future ticks for `kind`. Returns the job id that was attached.
    pub fn detach(&self, kind: JobKind) -> Option<JobId> {
        let task = self.tasks().remove(&kind)?;
        task.cancel.cancel();
        debug!(kind = %kind, job_id = %task.job_id, "Polling detached");
        Some(task.job_id)
    }

    pub fn detach_all(&self) {
        for kind in JobKind::ALL {
            self.detach(kind);
        }
    }

    pub fn is_polling(&self, kind: JobKind) -> bool {
        self.tasks()
            .get(&kind)
            .map(|task| !task.cancel.is_cancelled() && !task.handle.is_finished())
            .unwrap_or(false)
    }
}

async fn poll_loop(
    kind: JobKind,
    job_id: JobId,
    period: Duration,
    fetcher: Arc<dyn ResultFetcher>,
    target: Arc<dyn PollTarget>,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !target.is_current(kind, &job_id) {
            debug!(kind = %kind, job_id = %job_id, "Job no longer active, stopping poll");
            break;
        }

        ticks += 1;
        debug!(kind = %kind, job_id = %job_id, tick = ticks, "Polling job result");
        let outcome = fetcher.fetch_result(&job_id).await;

        if cancel.is_cancelled() || !target.is_current(kind, &job_id) {
            debug!(kind = %kind, job_id = %job_id, "Discarding late poll response");
            break;
        }

        if target.apply(kind, &job_id, outcome).await == PollControl::Stop {
            break;
        }
    }

    debug!(kind = %kind, job_id = %job_id, ticks, "Poll loop finished");
}
