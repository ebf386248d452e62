use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use tracing::{debug, info};

use crate::{
    error::StoreError,
    models::{JobId, JobKind, JobRecord, JobStatus},
};

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(JobRecord),
    AlreadyActive(JobRecord),
}

#[derive(Debug, Default)]
pub struct JobStore {
    slots: Mutex<HashMap<JobKind, JobRecord>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<JobKind, JobRecord>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A terminal record left in the slot is replaced.
    pub fn start(&self, kind: JobKind, id: JobId) -> StartOutcome {
        let mut slots = self.slots();
        if let Some(existing) = slots.get(&kind) {
            if existing.is_active() {
                debug!(kind = %kind, job_id = %existing.id, "Start rejected: job already active");
                return StartOutcome::AlreadyActive(existing.clone());
            }
        }

        let record = JobRecord::new(kind, id);
        info!(kind = %kind, job_id = %record.id, "Tracking job");
        slots.insert(kind, record.clone());
        StartOutcome::Started(record)
    }

    pub fn get(&self, kind: JobKind) -> Option<JobRecord> {
        self.slots().get(&kind).cloned()
    }

    pub fn status(&self, kind: JobKind) -> JobStatus {
        self.slots()
            .get(&kind)
            .map(|record| record.status)
            .unwrap_or(JobStatus::Pending)
    }

    pub fn is_current(&self, kind: JobKind, id: &JobId) -> bool {
        self.slots()
            .get(&kind)
            .map(|record| &record.id == id && record.is_active())
            .unwrap_or(false)
    }

    pub fn transition(
        &self,
        kind: JobKind,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<JobRecord, StoreError> {
        let mut slots = self.slots();
        let record = slots.get_mut(&kind).ok_or(StoreError::NotTracked(kind))?;
        apply_transition(record, status, error)
    }

    pub fn transition_job(
        &self,
        kind: JobKind,
        id: &JobId,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<JobRecord, StoreError> {
        let mut slots = self.slots();
        let record = tracked_mut(&mut slots, kind, id)?;
        apply_transition(record, status, error)
    }

    pub fn record_success(&self, kind: JobKind, id: &JobId) -> Result<JobRecord, StoreError> {
        let mut slots = self.slots();
        let record = tracked_mut(&mut slots, kind, id)?;
        if !record.is_active() {
            return Err(StoreError::InvalidTransition {
                kind,
                from: record.status,
                to: JobStatus::Running,
            });
        }
        record.retry_budget.reset();
        if record.status == JobStatus::Starting {
            apply_transition(record, JobStatus::Running, None)?;
        }
        Ok(record.clone())
    }

    /// Returns the consecutive failure count.
    pub fn record_failure(
        &self,
        kind: JobKind,
        id: &JobId,
        error: &str,
    ) -> Result<u32, StoreError> {
        let mut slots = self.slots();
        let record = tracked_mut(&mut slots, kind, id)?;
        if !record.is_active() {
            return Err(StoreError::InvalidTransition {
                kind,
                from: record.status,
                to: JobStatus::Failed,
            });
        }
        record.last_error = Some(error.to_string());
        record.updated_at = Utc::now();
        Ok(record.retry_budget.record_failure())
    }

    pub fn reset(&self, kind: JobKind) -> Option<JobRecord> {
        let removed = self.slots().remove(&kind);
        if let Some(record) = &removed {
            info!(kind = %kind, job_id = %record.id, status = %record.status, "Job slot reset");
        }
        removed
    }

    pub fn reset_job(&self, kind: JobKind, id: &JobId) -> Option<JobRecord> {
        let mut slots = self.slots();
        if slots.get(&kind).map(|record| &record.id) != Some(id) {
            return None;
        }
        let removed = slots.remove(&kind);
        debug!(kind = %kind, job_id = %id, "Consumed terminal job");
        removed
    }
}

fn tracked_mut<'a>(
    slots: &'a mut HashMap<JobKind, JobRecord>,
    kind: JobKind,
    id: &JobId,
) -> Result<&'a mut JobRecord, StoreError> {
    let record = slots.get_mut(&kind).ok_or(StoreError::NotTracked(kind))?;
    if &record.id != id {
        return Err(StoreError::IdentityMismatch {
            kind,
            expected: id.clone(),
            current: record.id.clone(),
        });
    }
    Ok(record)
}

fn apply_transition(
    record: &mut JobRecord,
    status: JobStatus,
    error: Option<String>,
) -> Result<JobRecord, StoreError> {
    if !record.status.can_transition_to(status) {
        return Err(StoreError::InvalidTransition {
            kind: record.kind,
            from: record.status,
            to: status,
        });
    }

    debug!(
        kind = %record.kind,
        job_id = %record.id,
        from = %record.status,
        to = %status,
        "Job transition"
    );
    record.status = status;
    record.updated_at = Utc::now();
    if error.is_some() {
        record.last_error = error;
    }
    Ok(record.clone())
}
