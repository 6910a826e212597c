//! Response payloads handed to the transport.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use printgate_infra::jobs::{ExecutionCounts, JobId, RegistryEntrySnapshot, SchedulerStats};

use crate::app::services::UserRecord;

/// Public view of a user; never carries the TOTP secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserDto {
    pub key: String,
    pub attributes: BTreeMap<String, String>,
    pub has_totp: bool,
    pub totp_revision: u64,
    pub totp_replaced_at: Option<DateTime<Utc>>,
}

impl From<&UserRecord> for UserDto {
    fn from(record: &UserRecord) -> Self {
        Self {
            key: record.key.to_string(),
            attributes: record.attributes.clone(),
            has_totp: record.totp_secret.is_some(),
            totp_revision: record.totp_revision,
            totp_replaced_at: record.totp_replaced_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusDto {
    pub jobs: Vec<RegistryEntrySnapshot>,
    pub stats: SchedulerStats,
    pub executions: ExecutionCounts,
    pub accepting: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSubmittedDto {
    pub job_id: JobId,
    pub fire_at: DateTime<Utc>,
}
