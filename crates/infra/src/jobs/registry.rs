//! Per-type run slots enforcing "at most one running execution per job type".
//!
//! ## Slot state machine
//!
//! Each [`JobType`] owns one atomic word:
//!
//! ```text
//!            reserve                start_reserved
//!   Idle ─────────────▶ Reserved ─────────────────▶ Running
//!    ▲  ◀───────────────    │                          │
//!    │      release                                    │
//!    │                                                 │
//!    └──────────────── mark_finished ◀─────────────────┘
//!    │                                                 ▲
//!    └──────────────── mark_started ───────────────────┘
//! ```
//!
//! Every arrow is a single compare-and-set on the slot word, so a busy check and the claim
//! that follows it cannot be split by a concurrent caller. A failed compare-and-set is
//! reported as [`RegistryError::AlreadyRunning`].
//!
//! The word holds a per-claim ticket (plus a marker bit while only reserved); a finish or
//! release carrying an old ticket fails its compare-and-set and leaves the slot untouched.
//!
//! Transitions swap the word while holding the slot's `info` lock, so [`JobRegistry::snapshot`]
//! always sees the word and the active execution from the same transition. Busy checks read
//! the word alone and never take the lock.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::types::{JobId, JobOutcome, JobType};

const IDLE: u64 = 0;
const RESERVED_BIT: u64 = 1 << 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("job type {0} is already running")]
    AlreadyRunning(JobType),
    #[error("reservation for job type {0} is no longer held")]
    StaleReservation(JobType),
}

/// Claim on an idle slot made at submission time; converted into a [`RunToken`] when a
/// worker starts the execution, or handed back with [`JobRegistry::release`].
#[derive(Debug)]
pub struct Reservation {
    job_type: JobType,
    ticket: u64,
    job_id: JobId,
}

impl Reservation {
    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

/// Proof of holding a slot in the running state.
#[derive(Debug)]
pub struct RunToken {
    job_type: JobType,
    ticket: u64,
    job_id: Option<JobId>,
}

impl RunToken {
    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Idle,
    Reserved,
    Running,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryEntrySnapshot {
    pub job_type: JobType,
    pub state: SlotState,
    pub active_job: Option<JobId>,
    /// When the current reservation or run began.
    pub started_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<JobOutcome>,
    pub last_finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SlotInfo {
    active_job: Option<JobId>,
    started_at: Option<DateTime<Utc>>,
    last_outcome: Option<JobOutcome>,
    last_finished_at: Option<DateTime<Utc>>,
}

/// `info` is only written by whoever currently owns `state`.
#[derive(Debug, Default)]
struct Slot {
    state: AtomicU64,
    info: Mutex<SlotInfo>,
}

/// Tracks, per job type, whether an execution is reserved or running.
#[derive(Debug)]
pub struct JobRegistry {
    slots: Vec<Slot>,
    next_ticket: AtomicU64,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            slots: JobType::ALL.iter().map(|_| Slot::default()).collect(),
            next_ticket: AtomicU64::new(1),
        }
    }

    fn slot(&self, job_type: JobType) -> &Slot {
        &self.slots[job_type.index()]
    }

    fn issue_ticket(&self) -> u64 {
        // Wraps only after 2^63 claims.
        self.next_ticket.fetch_add(1, Ordering::Relaxed) & !RESERVED_BIT
    }

    /// True if any of `types` currently has a running execution.
    pub fn is_executing(&self, types: &[JobType]) -> bool {
        types.iter().any(|t| {
            let word = self.slot(*t).state.load(Ordering::Acquire);
            word != IDLE && word & RESERVED_BIT == 0
        })
    }

    /// True if any of `types` is running or reserved by a pending exclusive submission.
    pub fn is_busy(&self, types: &[JobType]) -> bool {
        types
            .iter()
            .any(|t| self.slot(*t).state.load(Ordering::Acquire) != IDLE)
    }

    /// Move an idle slot straight to running.
    pub fn mark_started(&self, job_type: JobType) -> Result<RunToken, RegistryError> {
        self.claim_running(job_type, None)
    }

    /// Like [`JobRegistry::mark_started`], recording which execution holds the slot.
    pub fn mark_started_for(
        &self,
        job_type: JobType,
        job_id: JobId,
    ) -> Result<RunToken, RegistryError> {
        self.claim_running(job_type, Some(job_id))
    }

    fn claim_running(
        &self,
        job_type: JobType,
        job_id: Option<JobId>,
    ) -> Result<RunToken, RegistryError> {
        let slot = self.slot(job_type);
        let ticket = self.issue_ticket();
        {
            let mut info = slot.info.lock();
            slot.state
                .compare_exchange(IDLE, ticket, Ordering::AcqRel, Ordering::Acquire)
                .map_err(|_| RegistryError::AlreadyRunning(job_type))?;
            info.active_job = job_id;
            info.started_at = Some(Utc::now());
        }
        debug!(job_type = %job_type, ticket, "registry slot running");

        Ok(RunToken {
            job_type,
            ticket,
            job_id,
        })
    }

    /// Reserve an idle slot for a not-yet-started execution.
    pub fn reserve(&self, job_type: JobType, job_id: JobId) -> Result<Reservation, RegistryError> {
        let slot = self.slot(job_type);
        let ticket = self.issue_ticket();
        {
            let mut info = slot.info.lock();
            slot.state
                .compare_exchange(
                    IDLE,
                    ticket | RESERVED_BIT,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .map_err(|_| RegistryError::AlreadyRunning(job_type))?;
            info.active_job = Some(job_id);
            info.started_at = Some(Utc::now());
        }
        debug!(job_type = %job_type, job_id = %job_id, ticket, "registry slot reserved");

        Ok(Reservation {
            job_type,
            ticket,
            job_id,
        })
    }

    /// Turn a reservation into a running claim without ever passing through idle.
    pub fn start_reserved(&self, reservation: Reservation) -> Result<RunToken, RegistryError> {
        let slot = self.slot(reservation.job_type);
        {
            let mut info = slot.info.lock();
            slot.state
                .compare_exchange(
                    reservation.ticket | RESERVED_BIT,
                    reservation.ticket,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .map_err(|_| RegistryError::StaleReservation(reservation.job_type))?;
            info.started_at = Some(Utc::now());
        }
        debug!(job_type = %reservation.job_type, ticket = reservation.ticket, "reserved slot running");

        Ok(RunToken {
            job_type: reservation.job_type,
            ticket: reservation.ticket,
            job_id: Some(reservation.job_id),
        })
    }

    /// Give back an unused reservation. Returns `false` if it was no longer held.
    pub fn release(&self, reservation: Reservation) -> bool {
        let slot = self.slot(reservation.job_type);
        let held = reservation.ticket | RESERVED_BIT;

        let released = {
            let mut info = slot.info.lock();
            let released = slot
                .state
                .compare_exchange(held, IDLE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if released {
                info.active_job = None;
                info.started_at = None;
            }
            released
        };
        debug!(job_type = %reservation.job_type, released, "registry reservation released");
        released
    }

    /// Clear the running flag and record `outcome`.
    ///
    /// Calling this again with the same token is a no-op returning `false`.
    pub fn mark_finished(&self, token: &RunToken, outcome: JobOutcome) -> bool {
        let slot = self.slot(token.job_type);
        let mut info = slot.info.lock();
        if slot
            .state
            .compare_exchange(token.ticket, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(job_type = %token.job_type, ticket = token.ticket, "stale finish ignored");
            return false;
        }

        info.active_job = None;
        info.started_at = None;
        info.last_outcome = Some(outcome);
        info.last_finished_at = Some(Utc::now());
        drop(info);

        debug!(job_type = %token.job_type, ticket = token.ticket, "registry slot idle");
        true
    }

    /// Run `body` holding the slot for `job_type`.
    ///
    /// The slot is released even if `body` panics (the panic keeps unwinding).
    pub fn run_exclusive<F>(&self, job_type: JobType, body: F) -> Result<JobOutcome, RegistryError>
    where
        F: FnOnce() -> JobOutcome,
    {
        let guard = RunGuard::new(self, self.mark_started(job_type)?);
        let outcome = body();
        guard.finish(outcome.clone());
        Ok(outcome)
    }

    pub fn snapshot(&self) -> Vec<RegistryEntrySnapshot> {
        JobType::ALL
            .iter()
            .map(|t| {
                let slot = self.slot(*t);
                let info = slot.info.lock();
                let state = match slot.state.load(Ordering::Acquire) {
                    IDLE => SlotState::Idle,
                    w if w & RESERVED_BIT != 0 => SlotState::Reserved,
                    _ => SlotState::Running,
                };
                RegistryEntrySnapshot {
                    job_type: *t,
                    state,
                    active_job: info.active_job,
                    started_at: info.started_at,
                    last_outcome: info.last_outcome.clone(),
                    last_finished_at: info.last_finished_at,
                }
            })
            .collect()
    }
}

/// Scope guard over a [`RunToken`].
///
/// Dropping it without calling [`RunGuard::finish`] records a failure, so a body that
/// panics or returns early can never leave its job type stuck in the running state.
#[derive(Debug)]
pub struct RunGuard<'a> {
    registry: &'a JobRegistry,
    token: Option<RunToken>,
}

impl<'a> RunGuard<'a> {
    pub fn new(registry: &'a JobRegistry, token: RunToken) -> Self {
        Self {
            registry,
            token: Some(token),
        }
    }

    pub fn job_type(&self) -> Option<JobType> {
        self.token.as_ref().map(RunToken::job_type)
    }

    pub fn finish(mut self, outcome: JobOutcome) -> bool {
        match self.token.take() {
            Some(token) => self.registry.mark_finished(&token, outcome),
            None => false,
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.registry
                .mark_finished(&token, JobOutcome::failure("run aborted before completion"));
        }
    }
}
