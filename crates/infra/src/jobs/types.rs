//! Core job types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job execution identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Administrative job types. The set is closed and fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Database backup.
    DbBackup,
    /// Document log cleanup.
    DocLogClean,
    /// Application log cleanup.
    AppLogClean,
    /// Cleanup of orphaned user home directories.
    UserHomeClean,
    /// Follow-up after a print ticket was cancelled.
    TicketPrintCancel,
    /// Printer status poll.
    PrinterSnmp,
}

impl JobType {
    pub const ALL: [JobType; 6] = [
        JobType::DbBackup,
        JobType::DocLogClean,
        JobType::AppLogClean,
        JobType::UserHomeClean,
        JobType::TicketPrintCancel,
        JobType::PrinterSnmp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::DbBackup => "DB_BACKUP",
            JobType::DocLogClean => "DOC_LOG_CLEAN",
            JobType::AppLogClean => "APP_LOG_CLEAN",
            JobType::UserHomeClean => "USER_HOME_CLEAN",
            JobType::TicketPrintCancel => "TICKET_PRINT_CANCEL",
            JobType::PrinterSnmp => "PRINTER_SNMP",
        }
    }

    /// Dense index into per-type tables.
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job type: {0}")]
pub struct UnknownJobType(pub String);

impl std::str::FromStr for JobType {
    type Err = UnknownJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownJobType(s.to_string()))
    }
}

/// Lifecycle state of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    /// Waiting for its fire time or a free worker.
    Scheduled,
    /// Claimed by a worker and holding the type's run slot.
    Running,
    /// Body completed successfully.
    Succeeded,
    /// Body returned an error or panicked.
    Failed { error: String },
    /// Another execution of the same type was running at fire time.
    Skipped,
    /// The scheduler shut down before the fire time.
    Abandoned,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Scheduled | JobStatus::Running)
    }
}

/// What a job body reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum JobOutcome {
    Success,
    Failure { error: String },
}

impl JobOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for JobOutcome {
    fn from(value: Result<(), E>) -> Self {
        match value {
            Ok(()) => JobOutcome::Success,
            Err(e) => JobOutcome::failure(e.to_string()),
        }
    }
}

/// One scheduled or running instance of a job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: JobId,
    pub job_type: JobType,
    /// Free-form parameters handed to the body.
    pub params: serde_json::Value,
    pub status: JobStatus,
    /// Whether the submission holds a registry reservation for its type.
    pub exclusive: bool,
    pub submitted_at: DateTime<Utc>,
    /// Earliest time a worker may start the body (`submitted_at + delay`).
    pub fire_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobExecution {
    pub fn new(job_type: JobType, delay: Duration, params: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type,
            params,
            status: JobStatus::Scheduled,
            exclusive: false,
            submitted_at: now,
            fire_at: chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_finished(&mut self, outcome: &JobOutcome) {
        self.status = match outcome {
            JobOutcome::Success => JobStatus::Succeeded,
            JobOutcome::Failure { error } => JobStatus::Failed {
                error: error.clone(),
            },
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_skipped(&mut self) {
        self.status = JobStatus::Skipped;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_abandoned(&mut self) {
        self.status = JobStatus::Abandoned;
        self.finished_at = Some(Utc::now());
    }

    /// Run time in milliseconds, once finished.
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_milliseconds().max(0) as u64)
    }
}
