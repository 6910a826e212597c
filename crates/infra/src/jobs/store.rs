//! Execution storage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::debug;

use super::types::{JobExecution, JobId, JobStatus, JobType};

/// Execution store abstraction.
pub trait ExecutionStore: Send + Sync {
    /// Record a freshly submitted execution.
    fn insert(&self, execution: JobExecution) -> Result<JobId, ExecutionStoreError>;

    /// Replace a stored execution.
    fn update(&self, execution: &JobExecution) -> Result<(), ExecutionStoreError>;

    fn get(&self, job_id: JobId) -> Result<Option<JobExecution>, ExecutionStoreError>;

    /// Most recent executions of one type, newest first.
    fn list_by_type(
        &self,
        job_type: JobType,
        limit: usize,
    ) -> Result<Vec<JobExecution>, ExecutionStoreError>;

    fn counts(&self) -> Result<ExecutionCounts, ExecutionStoreError>;

    /// Drop terminal executions that finished before `cutoff`. Returns how many were removed.
    fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, ExecutionStoreError>;

    /// Block until the execution is terminal or `timeout` elapses; returns its latest state.
    fn wait_terminal(
        &self,
        job_id: JobId,
        timeout: Duration,
    ) -> Result<Option<JobExecution>, ExecutionStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionStoreError {
    #[error("job execution not found: {0}")]
    NotFound(JobId),
    #[error("job execution already exists: {0}")]
    AlreadyExists(JobId),
}

/// Number of stored executions per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionCounts {
    pub scheduled: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub abandoned: usize,
}

/// In-memory store keeping finished executions observable for a retention window.
#[derive(Debug)]
pub struct InMemoryExecutionStore {
    retention: Duration,
    executions: Mutex<HashMap<JobId, JobExecution>>,
    changed: Condvar,
}

impl InMemoryExecutionStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            executions: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
        }
    }

    pub fn arc(retention: Duration) -> Arc<Self> {
        Arc::new(Self::new(retention))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.executions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retention_cutoff(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn prune_locked(executions: &mut HashMap<JobId, JobExecution>, cutoff: DateTime<Utc>) -> usize {
    let before = executions.len();
    executions.retain(|_, e| {
        !(e.status.is_terminal() && e.finished_at.is_some_and(|finished| finished < cutoff))
    });
    before - executions.len()
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn insert(&self, execution: JobExecution) -> Result<JobId, ExecutionStoreError> {
        let cutoff = self.retention_cutoff();
        let mut executions = self.executions.lock();

        let pruned = prune_locked(&mut executions, cutoff);
        if pruned > 0 {
            debug!(pruned, "pruned expired job executions");
        }

        if executions.contains_key(&execution.id) {
            return Err(ExecutionStoreError::AlreadyExists(execution.id));
        }
        let id = execution.id;
        executions.insert(id, execution);
        Ok(id)
    }

    fn update(&self, execution: &JobExecution) -> Result<(), ExecutionStoreError> {
        let mut executions = self.executions.lock();
        let slot = executions
            .get_mut(&execution.id)
            .ok_or(ExecutionStoreError::NotFound(execution.id))?;
        *slot = execution.clone();
        drop(executions);

        self.changed.notify_all();
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobExecution>, ExecutionStoreError> {
        Ok(self.executions.lock().get(&job_id).cloned())
    }

    fn list_by_type(
        &self,
        job_type: JobType,
        limit: usize,
    ) -> Result<Vec<JobExecution>, ExecutionStoreError> {
        let executions = self.executions.lock();
        let mut result: Vec<_> = executions
            .values()
            .filter(|e| e.job_type == job_type)
            .cloned()
            .collect();

        result.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        result.truncate(limit);
        Ok(result)
    }

    fn counts(&self) -> Result<ExecutionCounts, ExecutionStoreError> {
        let executions = self.executions.lock();
        let mut counts = ExecutionCounts::default();

        for execution in executions.values() {
            match &execution.status {
                JobStatus::Scheduled => counts.scheduled += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed { .. } => counts.failed += 1,
                JobStatus::Skipped => counts.skipped += 1,
                JobStatus::Abandoned => counts.abandoned += 1,
            }
        }

        Ok(counts)
    }

    fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, ExecutionStoreError> {
        Ok(prune_locked(&mut self.executions.lock(), cutoff))
    }

    fn wait_terminal(
        &self,
        job_id: JobId,
        timeout: Duration,
    ) -> Result<Option<JobExecution>, ExecutionStoreError> {
        let deadline = Instant::now() + timeout;
        let mut executions = self.executions.lock();

        loop {
            let terminal = match executions.get(&job_id) {
                None => return Ok(None),
                Some(e) => e.status.is_terminal(),
            };
            if terminal || self.changed.wait_until(&mut executions, deadline).timed_out() {
                return Ok(executions.get(&job_id).cloned());
            }
        }
    }
}

impl ExecutionStore for Arc<InMemoryExecutionStore> {
    fn insert(&self, execution: JobExecution) -> Result<JobId, ExecutionStoreError> {
        (**self).insert(execution)
    }

    fn update(&self, execution: &JobExecution) -> Result<(), ExecutionStoreError> {
        (**self).update(execution)
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobExecution>, ExecutionStoreError> {
        (**self).get(job_id)
    }

    fn list_by_type(
        &self,
        job_type: JobType,
        limit: usize,
    ) -> Result<Vec<JobExecution>, ExecutionStoreError> {
        (**self).list_by_type(job_type, limit)
    }

    fn counts(&self) -> Result<ExecutionCounts, ExecutionStoreError> {
        (**self).counts()
    }

    fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, ExecutionStoreError> {
        (**self).prune_finished_before(cutoff)
    }

    fn wait_terminal(
        &self,
        job_id: JobId,
        timeout: Duration,
    ) -> Result<Option<JobExecution>, ExecutionStoreError> {
        (**self).wait_terminal(job_id, timeout)
    }
}
