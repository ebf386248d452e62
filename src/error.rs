use thiserror::Error;

use crate::models::{JobId, JobKind, JobRecord, JobStatus};

/// Failure surfaced by a transport collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("server responded {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("transport client error: {0}")]
    Client(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no job is tracked for {0}")]
    NotTracked(JobKind),
    #[error("tracked {kind} job is {current}, not {expected}")]
    IdentityMismatch {
        kind: JobKind,
        expected: JobId,
        current: JobId,
    },
    #[error("cannot move {kind} job from {from} to {to}")]
    InvalidTransition {
        kind: JobKind,
        from: JobStatus,
        to: JobStatus,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a {} job is already active ({})", .0.kind, .0.id)]
    AlreadyActive(Box<JobRecord>),
    #[error("the server did not start a {0} job")]
    NoJobStarted(JobKind),
    #[error("failed to start {kind} job: {source}")]
    Start {
        kind: JobKind,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
