use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    FindIssues,
    CatalogAi,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::FindIssues, JobKind::CatalogAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FindIssues => "find_issues",
            Self::CatalogAi => "catalog_ai",
        }
    }

    /// Name of the history partition holding past runs of this kind.
    pub fn history_partition(&self) -> &'static str {
        match self {
            Self::FindIssues => "findings",
            Self::CatalogAi => "catalog",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownJobKind(pub String);

impl fmt::Display for UnknownJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job kind: {}", self.0)
    }
}

impl std::error::Error for UnknownJobKind {}

impl FromStr for JobKind {
    type Err = UnknownJobKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "find_issues" => Ok(Self::FindIssues),
            "catalog_ai" => Ok(Self::CatalogAi),
            _ => Err(UnknownJobKind(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Forward edges of the lifecycle. `pending` is only re-entered through a reset.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Running)
                | (
                    Self::Starting | Self::Running,
                    Self::Completed | Self::Failed | Self::Stopped
                )
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Consecutive transient fetch failures for one tracked job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    consumed: u32,
}

impl RetryBudget {
    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consumed = self.consumed.saturating_add(1);
        self.consumed
    }

    pub fn reset(&mut self) {
        self.consumed = 0;
    }

    pub fn is_exhausted(&self, limit: u32) -> bool {
        self.consumed >= limit
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub retry_budget: RetryBudget,
}

impl JobRecord {
    pub fn new(kind: JobKind, id: JobId) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            status: JobStatus::Starting,
            started_at: now,
            updated_at: now,
            last_error: None,
            retry_budget: RetryBudget::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Live,
    Cached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSnapshot {
    pub kind: JobKind,
    pub payload: Value,
    pub captured_at: DateTime<Utc>,
    pub source: SnapshotSource,
}

impl ResultSnapshot {
    pub fn live(kind: JobKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            captured_at: Utc::now(),
            source: SnapshotSource::Live,
        }
    }

    pub fn cached(kind: JobKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            captured_at: Utc::now(),
            source: SnapshotSource::Cached,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// The server reported a definitive failure.
    Rejected,
    /// Polling gave up after this many consecutive transient failures.
    BudgetExhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl JobFailure {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            reason: FailureReason::Rejected,
            message: message.into(),
        }
    }

    pub fn budget_exhausted(attempts: u32, message: impl Into<String>) -> Self {
        Self {
            reason: FailureReason::BudgetExhausted { attempts },
            message: message.into(),
        }
    }
}

/// Parameters forwarded to the start-job collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub path: Option<String>,
    pub depth: Option<u32>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
    pub id: Option<JobId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub job_id: JobId,
}

/// What a consumer renders for one job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub kind: JobKind,
    pub status: JobStatus,
    pub processing: bool,
    pub record: Option<JobRecord>,
    pub result: Option<ResultSnapshot>,
}
