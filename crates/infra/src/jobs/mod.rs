//! Background one-shot jobs with per-type exclusivity.
//!
//! ## Design
//!
//! - The set of job types is closed ([`JobType::ALL`])
//! - At most one execution per job type is running at any instant, enforced by
//!   [`JobRegistry`] with one compare-and-set per transition
//! - Submission is fire-and-forget; exclusivity is checked again when the job actually runs
//! - Executions stay observable in an [`ExecutionStore`] for a retention window
//!
//! ## Components
//!
//! - `JobRegistry`: per-type run slots, reservations, run guards
//! - `JobScheduler`: timer thread + worker pool running registered `JobBodies`
//! - `ExecutionStore`: execution records and their lifecycle

pub mod registry;
pub mod scheduler;
pub mod store;
pub mod types;

pub use registry::{
    JobRegistry, RegistryEntrySnapshot, RegistryError, Reservation, RunGuard, RunToken, SlotState,
};
pub use scheduler::{
    JobBodies, JobBody, JobContext, JobHandle, JobScheduler, SchedulerConfig, SchedulerStats,
    SchedulingError,
};
pub use store::{ExecutionCounts, ExecutionStore, ExecutionStoreError, InMemoryExecutionStore};
pub use types::{JobExecution, JobId, JobOutcome, JobStatus, JobType, UnknownJobType};
