//! Runtime configuration loaded from the environment.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::locks::LockPolicy;

pub const ENV_JOB_WORKERS: &str = "PRINTGATE_JOB_WORKERS";
pub const ENV_LOCK_TIMEOUT_MS: &str = "PRINTGATE_LOCK_TIMEOUT_MS";
pub const ENV_JOB_RETENTION_SECS: &str = "PRINTGATE_JOB_RETENTION_SECS";
pub const ENV_SCHEDULER_NAME: &str = "PRINTGATE_SCHEDULER_NAME";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process-wide settings for the coordination layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeConfig {
    /// Size of the job worker pool (fixed at startup, >= 1).
    pub job_workers: usize,
    /// Maximum time to wait for a principal lock; `None` blocks indefinitely.
    pub lock_timeout: Option<Duration>,
    /// How long finished job executions stay observable.
    pub job_retention: Duration,
    /// Thread name prefix of the scheduler's timer and workers.
    pub scheduler_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            job_workers: 2,
            lock_timeout: Some(Duration::from_secs(30)),
            job_retention: Duration::from_secs(3600),
            scheduler_name: "printgate-jobs".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load from process environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (handy for tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(ENV_JOB_WORKERS) {
            let workers = parse_u64(ENV_JOB_WORKERS, &raw)?;
            if workers == 0 {
                return Err(invalid(ENV_JOB_WORKERS, &raw, "must be at least 1"));
            }
            cfg.job_workers = workers as usize;
        }

        if let Some(raw) = lookup(ENV_LOCK_TIMEOUT_MS) {
            cfg.lock_timeout = match parse_u64(ENV_LOCK_TIMEOUT_MS, &raw)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            };
        }

        if let Some(raw) = lookup(ENV_JOB_RETENTION_SECS) {
            cfg.job_retention = Duration::from_secs(parse_u64(ENV_JOB_RETENTION_SECS, &raw)?);
        }

        if let Some(raw) = lookup(ENV_SCHEDULER_NAME) {
            let name = raw.trim();
            if name.is_empty() {
                return Err(invalid(ENV_SCHEDULER_NAME, &raw, "must not be blank"));
            }
            cfg.scheduler_name = name.to_string();
        }

        Ok(cfg)
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            timeout: self.lock_timeout,
        }
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| invalid(key, raw, &e.to_string()))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
