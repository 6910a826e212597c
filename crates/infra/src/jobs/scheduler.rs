//! One-shot job scheduler: a timer thread feeding a fixed worker pool.
//!
//! Submission never waits for the job. The timer thread holds pending executions ordered by
//! fire time (then submission order) and hands due ones to the workers. A worker claims
//! the type's registry slot right before running the body; if the type is already running
//! the execution is recorded as `Skipped` instead of waiting.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;

use super::registry::{JobRegistry, RegistryError, Reservation, RunGuard};
use super::store::{ExecutionStore, ExecutionStoreError, InMemoryExecutionStore};
use super::types::{JobExecution, JobId, JobOutcome, JobStatus, JobType};

/// Delays are clamped to this so deadline arithmetic cannot overflow.
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("job scheduler is shutting down")]
    ShuttingDown,
    #[error("no job body registered for {0}")]
    NoBody(JobType),
    #[error("job scheduler unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("execution store: {0}")]
    Store(#[from] ExecutionStoreError),
}

impl SchedulingError {
    pub fn is_already_running(&self) -> bool {
        matches!(self, SchedulingError::Registry(RegistryError::AlreadyRunning(_)))
    }
}

/// What a job body sees when it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_type: JobType,
    pub params: JsonValue,
    pub fire_at: DateTime<Utc>,
}

pub type JobBody = Arc<dyn Fn(&JobContext) -> JobOutcome + Send + Sync>;

/// Job bodies keyed by type, fixed when the scheduler starts.
#[derive(Clone, Default)]
pub struct JobBodies {
    bodies: HashMap<JobType, JobBody>,
}

impl JobBodies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, job_type: JobType, body: F) -> Self
    where
        F: Fn(&JobContext) -> JobOutcome + Send + Sync + 'static,
    {
        self.bodies.insert(job_type, Arc::new(body));
        self
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.bodies.contains_key(&job_type)
    }

    fn get(&self, job_type: JobType) -> Option<&JobBody> {
        self.bodies.get(&job_type)
    }
}

impl std::fmt::Debug for JobBodies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.bodies.keys().collect();
        types.sort();
        f.debug_struct("JobBodies").field("types", &types).finish()
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool size (at least one worker is always started)
    pub workers: usize,
    /// Thread name prefix
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            name: "printgate-jobs".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

impl From<&RuntimeConfig> for SchedulerConfig {
    fn from(cfg: &RuntimeConfig) -> Self {
        Self {
            workers: cfg.job_workers,
            name: cfg.scheduler_name.clone(),
        }
    }
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Fired while another execution of the same type was running.
    pub skipped: u64,
    pub abandoned: u64,
}

/// Caller-side view of one submitted execution.
#[derive(Debug, Clone)]
pub struct JobHandle<S = Arc<InMemoryExecutionStore>> {
    job_id: JobId,
    job_type: JobType,
    fire_at: DateTime<Utc>,
    store: S,
}

impl<S: ExecutionStore> JobHandle<S> {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn fire_at(&self) -> DateTime<Utc> {
        self.fire_at
    }

    /// Current status, or `None` once the execution has aged out of the store.
    pub fn status(&self) -> Result<Option<JobStatus>, ExecutionStoreError> {
        Ok(self.store.get(self.job_id)?.map(|e| e.status))
    }

    /// Block until the execution is terminal or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<Option<JobExecution>, ExecutionStoreError> {
        self.store.wait_terminal(self.job_id, timeout)
    }
}

/// Timer queue entry.
#[derive(Debug)]
struct Pending {
    due: Instant,
    seq: u64,
    job_id: JobId,
    job_type: JobType,
    reservation: Option<Reservation>,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed: BinaryHeap is a max-heap and the earliest entry must surface first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Shared<S> {
    name: String,
    registry: Arc<JobRegistry>,
    store: S,
    bodies: JobBodies,
    stats: Mutex<SchedulerStats>,
}

/// Runs one-shot jobs on a fixed worker pool.
///
/// Constructed explicitly and shut down explicitly (or on drop); there is no global instance.
pub struct JobScheduler<S = Arc<InMemoryExecutionStore>>
where
    S: ExecutionStore + Clone + 'static,
{
    shared: Arc<Shared<S>>,
    accepting: AtomicBool,
    next_seq: AtomicU64,
    intake: Mutex<Option<mpsc::Sender<Pending>>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl<S> std::fmt::Debug for JobScheduler<S>
where
    S: ExecutionStore + Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("name", &self.shared.name)
            .field("accepting", &self.accepting.load(Ordering::Relaxed))
            .field("bodies", &self.shared.bodies)
            .finish()
    }
}

impl<S> JobScheduler<S>
where
    S: ExecutionStore + Clone + 'static,
{
    /// Spawn the timer thread and `config.workers` workers.
    pub fn start(
        config: SchedulerConfig,
        registry: Arc<JobRegistry>,
        store: S,
        bodies: JobBodies,
    ) -> Result<Self, SchedulingError> {
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            registry,
            store,
            bodies,
            stats: Mutex::new(SchedulerStats::default()),
        });

        let (intake_tx, intake_rx) = mpsc::channel::<Pending>();
        let (work_tx, work_rx) = mpsc::channel::<Pending>();
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut threads = Vec::new();
        let workers = config.workers.max(1);
        for i in 0..workers {
            let shared = shared.clone();
            let work_rx = work_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{i}", config.name))
                .spawn(move || worker_loop(shared, work_rx));
            match spawned {
                Ok(join) => threads.push(join),
                Err(e) => {
                    // Dropping work_tx lets the workers already started exit.
                    drop(work_tx);
                    join_all(threads);
                    return Err(SchedulingError::Unavailable(e.to_string()));
                }
            }
        }

        let timer_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-timer", config.name))
            .spawn(move || timer_loop(timer_shared, intake_rx, work_tx));
        match spawned {
            Ok(join) => threads.push(join),
            Err(e) => {
                // The unused work sender was moved into the failed closure and dropped.
                join_all(threads);
                return Err(SchedulingError::Unavailable(e.to_string()));
            }
        }

        info!(scheduler = %config.name, workers, "job scheduler started");

        Ok(Self {
            shared,
            accepting: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
            intake: Mutex::new(Some(intake_tx)),
            threads: Mutex::new(threads),
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.shared.registry
    }

    pub fn store(&self) -> &S {
        &self.shared.store
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats.lock().clone()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// True if any of `types` has a running execution.
    pub fn is_executing(&self, types: &[JobType]) -> bool {
        self.shared.registry.is_executing(types)
    }

    /// True if any of `types` is running or reserved by an exclusive submission.
    pub fn is_busy(&self, types: &[JobType]) -> bool {
        self.shared.registry.is_busy(types)
    }

    /// Run `job_type` once, no earlier than `delay` from now.
    ///
    /// Does not check whether the type is busy; a duplicate that fires while another run
    /// of the type is in progress ends up `Skipped`.
    pub fn schedule_one_shot(
        &self,
        job_type: JobType,
        delay: Duration,
    ) -> Result<JobHandle<S>, SchedulingError> {
        self.submit(job_type, delay, JsonValue::Null, false)
    }

    pub fn schedule_one_shot_with(
        &self,
        job_type: JobType,
        delay: Duration,
        params: JsonValue,
    ) -> Result<JobHandle<S>, SchedulingError> {
        self.submit(job_type, delay, params, false)
    }

    /// Like [`JobScheduler::schedule_one_shot_with`], but atomically reserves the type at
    /// submission: fails with `AlreadyRunning` if the type is running or already reserved.
    pub fn schedule_exclusive(
        &self,
        job_type: JobType,
        delay: Duration,
        params: JsonValue,
    ) -> Result<JobHandle<S>, SchedulingError> {
        self.submit(job_type, delay, params, true)
    }

    fn submit(
        &self,
        job_type: JobType,
        delay: Duration,
        params: JsonValue,
        exclusive: bool,
    ) -> Result<JobHandle<S>, SchedulingError> {
        if !self.is_accepting() {
            return Err(SchedulingError::ShuttingDown);
        }
        if !self.shared.bodies.contains(job_type) {
            return Err(SchedulingError::NoBody(job_type));
        }

        let delay = delay.min(MAX_DELAY);
        let mut execution = JobExecution::new(job_type, delay, params);
        let job_id = execution.id;
        let fire_at = execution.fire_at;

        let reservation = if exclusive {
            execution = execution.exclusive();
            Some(self.shared.registry.reserve(job_type, job_id)?)
        } else {
            None
        };

        if let Err(e) = self.shared.store.insert(execution) {
            if let Some(r) = reservation {
                self.shared.registry.release(r);
            }
            return Err(e.into());
        }

        let pending = Pending {
            due: Instant::now() + delay,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            job_id,
            job_type,
            reservation,
        };

        // Counted before the hand-off so no outcome is ever recorded ahead of its submission.
        let refused = {
            let intake = self.intake.lock();
            match intake.as_ref() {
                Some(tx) => {
                    self.shared.stats.lock().submitted += 1;
                    let refused = tx.send(pending).err().map(|e| e.0);
                    if refused.is_some() {
                        self.shared.stats.lock().submitted -= 1;
                    }
                    refused
                }
                None => Some(pending),
            }
        };
        if let Some(pending) = refused {
            retire(&self.shared, pending);
            return Err(SchedulingError::ShuttingDown);
        }

        info!(
            scheduler = %self.shared.name,
            job_type = %job_type,
            job_id = %job_id,
            delay_ms = delay.as_millis() as u64,
            exclusive,
            "job scheduled"
        );

        Ok(JobHandle {
            job_id,
            job_type,
            fire_at,
            store: self.shared.store.clone(),
        })
    }

    /// Stop intake, abandon executions that are not yet due, let claimed ones finish, and
    /// join every scheduler thread. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(scheduler = %self.shared.name, "job scheduler shutting down");

        // Disconnecting the intake channel tells the timer thread to wind down.
        drop(self.intake.lock().take());

        let threads = std::mem::take(&mut *self.threads.lock());
        join_all(threads);

        info!(scheduler = %self.shared.name, stats = ?self.stats(), "job scheduler stopped");
    }
}

impl<S> Drop for JobScheduler<S>
where
    S: ExecutionStore + Clone + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn join_all(threads: Vec<thread::JoinHandle<()>>) {
    for join in threads {
        if join.join().is_err() {
            error!("job scheduler thread panicked");
        }
    }
}

fn timer_loop<S: ExecutionStore>(
    shared: Arc<Shared<S>>,
    intake: mpsc::Receiver<Pending>,
    work: mpsc::Sender<Pending>,
) {
    let mut queue: BinaryHeap<Pending> = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while queue.peek().is_some_and(|p| p.due <= now) {
            if let Some(due) = queue.pop() {
                debug!(job_type = %due.job_type, job_id = %due.job_id, "job due");
                if let Err(mpsc::SendError(due)) = work.send(due) {
                    abandon(&shared, due);
                }
            }
        }

        let received = match queue.peek() {
            Some(next) => intake.recv_timeout(next.due.saturating_duration_since(now)),
            None => intake
                .recv()
                .map_err(|_| mpsc::RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(pending) => queue.push(pending),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let abandoned = queue.len();
    for pending in queue.into_vec() {
        abandon(&shared, pending);
    }
    if abandoned > 0 {
        info!(scheduler = %shared.name, abandoned, "abandoned executions that were not yet due");
    }
    // Dropping `work` here lets the workers drain what was already handed over and exit.
}

fn worker_loop<S: ExecutionStore>(shared: Arc<Shared<S>>, work: Arc<Mutex<mpsc::Receiver<Pending>>>) {
    loop {
        let next = work.lock().recv();
        match next {
            Ok(pending) => run_pending(&shared, pending),
            Err(mpsc::RecvError) => break,
        }
    }
    debug!(scheduler = %shared.name, "job worker stopped");
}

fn run_pending<S: ExecutionStore>(shared: &Shared<S>, pending: Pending) {
    let Pending {
        job_id,
        job_type,
        reservation,
        ..
    } = pending;

    let mut execution = match shared.store.get(job_id) {
        Ok(Some(e)) => e,
        Ok(None) | Err(_) => {
            warn!(job_type = %job_type, job_id = %job_id, "due execution missing from store");
            if let Some(r) = reservation {
                shared.registry.release(r);
            }
            return;
        }
    };

    let claimed = match reservation {
        Some(r) => shared.registry.start_reserved(r),
        None => shared.registry.mark_started_for(job_type, job_id),
    };
    let token = match claimed {
        Ok(token) => token,
        Err(e) => {
            info!(job_type = %job_type, job_id = %job_id, reason = %e, "job skipped: type busy");
            shared.stats.lock().skipped += 1;
            execution.mark_skipped();
            persist(shared, &execution);
            return;
        }
    };
    let guard = RunGuard::new(&shared.registry, token);

    execution.mark_running();
    persist(shared, &execution);
    info!(job_type = %job_type, job_id = %job_id, "job started");

    let ctx = JobContext {
        job_id,
        job_type,
        params: execution.params.clone(),
        fire_at: execution.fire_at,
    };
    let outcome = match shared.bodies.get(job_type) {
        Some(body) => catch_unwind(AssertUnwindSafe(|| body(&ctx)))
            .unwrap_or_else(|panic| JobOutcome::failure(crate::panic_message(&*panic))),
        None => JobOutcome::failure(format!("no job body registered for {job_type}")),
    };

    // Free the type before publishing the terminal state so waiters can resubmit at once.
    guard.finish(outcome.clone());
    execution.mark_finished(&outcome);

    match &outcome {
        JobOutcome::Success => {
            shared.stats.lock().succeeded += 1;
            info!(job_type = %job_type, job_id = %job_id, duration_ms = execution.duration_ms(), "job succeeded");
        }
        JobOutcome::Failure { error } => {
            shared.stats.lock().failed += 1;
            warn!(job_type = %job_type, job_id = %job_id, error = %error, "job failed");
        }
    }
    persist(shared, &execution);
}

/// Abandon an accepted submission that will never run.
fn abandon<S: ExecutionStore>(shared: &Shared<S>, pending: Pending) {
    shared.stats.lock().abandoned += 1;
    retire(shared, pending);
}

/// Free the reservation and mark the stored execution abandoned, without counting it.
fn retire<S: ExecutionStore>(shared: &Shared<S>, pending: Pending) {
    if let Some(r) = pending.reservation {
        shared.registry.release(r);
    }
    match shared.store.get(pending.job_id) {
        Ok(Some(mut execution)) => {
            execution.mark_abandoned();
            persist(shared, &execution);
        }
        Ok(None) => {}
        Err(e) => error!(job_id = %pending.job_id, error = %e, "failed to load abandoned execution"),
    }
    debug!(job_type = %pending.job_type, job_id = %pending.job_id, "job abandoned");
}

fn persist<S: ExecutionStore>(shared: &Shared<S>, execution: &JobExecution) {
    if let Err(e) = shared.store.update(execution) {
        error!(job_id = %execution.id, error = %e, "failed to record job execution state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn scheduler(workers: usize, bodies: JobBodies) -> JobScheduler {
        JobScheduler::start(
            SchedulerConfig::default()
                .with_name("test-jobs")
                .with_workers(workers),
            Arc::new(JobRegistry::new()),
            InMemoryExecutionStore::arc(Duration::from_secs(60)),
            bodies,
        )
        .unwrap()
    }

    fn all_succeed() -> JobBodies {
        JobType::ALL
            .into_iter()
            .fold(JobBodies::new(), |b, t| b.register(t, |_| JobOutcome::Success))
    }

    #[test]
    fn runs_no_earlier_than_delay() {
        let sched = scheduler(2, all_succeed());
        let delay = Duration::from_millis(60);

        let submitted = Instant::now();
        let handle = sched
            .schedule_one_shot(JobType::AppLogClean, delay)
            .unwrap();
        assert!(submitted.elapsed() < delay);

        let done = handle.wait(WAIT).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert!(done.started_at.unwrap() >= done.fire_at);
        assert!(submitted.elapsed() >= delay);
        assert_eq!(sched.stats().succeeded, 1);
    }

    #[test]
    fn submission_does_not_wait_for_long_delays() {
        let sched = scheduler(1, all_succeed());

        let submitted = Instant::now();
        let handle = sched
            .schedule_one_shot(JobType::DbBackup, Duration::from_secs(3600))
            .unwrap();
        assert!(submitted.elapsed() < Duration::from_millis(100));
        assert_eq!(handle.status().unwrap(), Some(JobStatus::Scheduled));

        sched.shutdown();
        assert_eq!(handle.status().unwrap(), Some(JobStatus::Abandoned));
        assert_eq!(sched.stats().abandoned, 1);
    }

    #[test]
    fn missing_body_and_shutdown_are_rejected() {
        let sched = scheduler(1, JobBodies::new().register(JobType::DbBackup, |_| JobOutcome::Success));

        assert_eq!(
            sched
                .schedule_one_shot(JobType::PrinterSnmp, Duration::ZERO)
                .unwrap_err(),
            SchedulingError::NoBody(JobType::PrinterSnmp)
        );

        sched.shutdown();
        sched.shutdown();
        assert_eq!(
            sched
                .schedule_one_shot(JobType::DbBackup, Duration::ZERO)
                .unwrap_err(),
            SchedulingError::ShuttingDown
        );
    }

    #[test]
    fn exclusive_submission_is_rejected_while_reserved_or_running() {
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let bodies = JobBodies::new().register(JobType::DbBackup, move |_| {
            let _ = release_rx.lock().recv_timeout(WAIT);
            JobOutcome::Success
        });
        let sched = scheduler(2, bodies);

        let first = sched
            .schedule_exclusive(JobType::DbBackup, Duration::ZERO, JsonValue::Null)
            .unwrap();
        let err = sched
            .schedule_exclusive(JobType::DbBackup, Duration::ZERO, JsonValue::Null)
            .unwrap_err();
        assert!(err.is_already_running());
        assert!(sched.is_busy(&[JobType::DbBackup]));

        release_tx.send(()).unwrap();
        assert_eq!(
            first.wait(WAIT).unwrap().unwrap().status,
            JobStatus::Succeeded
        );
        assert!(!sched.is_busy(&[JobType::DbBackup]));

        release_tx.send(()).unwrap();
        let again = sched
            .schedule_exclusive(JobType::DbBackup, Duration::ZERO, JsonValue::Null)
            .unwrap();
        assert_eq!(
            again.wait(WAIT).unwrap().unwrap().status,
            JobStatus::Succeeded
        );
    }

    #[test]
    fn duplicate_firing_while_running_is_skipped() {
        let sched = scheduler(2, all_succeed());
        let token = sched.registry().mark_started(JobType::DocLogClean).unwrap();

        let handle = sched
            .schedule_one_shot(JobType::DocLogClean, Duration::ZERO)
            .unwrap();
        assert_eq!(handle.wait(WAIT).unwrap().unwrap().status, JobStatus::Skipped);
        assert_eq!(sched.stats().skipped, 1);

        assert!(sched.registry().mark_finished(&token, JobOutcome::Success));
    }

    #[test]
    fn panicking_body_fails_and_frees_the_type() {
        let bodies = JobBodies::new().register(JobType::UserHomeClean, |ctx| {
            if ctx.params["crash"] == JsonValue::Bool(true) {
                panic!("home cleanup crashed");
            }
            JobOutcome::Success
        });
        let sched = scheduler(1, bodies);

        let crashed = sched
            .schedule_exclusive(
                JobType::UserHomeClean,
                Duration::ZERO,
                serde_json::json!({"crash": true}),
            )
            .unwrap();
        let done = crashed.wait(WAIT).unwrap().unwrap();
        assert_eq!(
            done.status,
            JobStatus::Failed {
                error: "home cleanup crashed".to_string()
            }
        );
        assert!(!sched.is_busy(&[JobType::UserHomeClean]));

        let retry = sched
            .schedule_exclusive(JobType::UserHomeClean, Duration::ZERO, JsonValue::Null)
            .unwrap();
        assert_eq!(
            retry.wait(WAIT).unwrap().unwrap().status,
            JobStatus::Succeeded
        );
        assert_eq!(sched.stats().failed, 1);
    }

    #[test]
    fn outcomes_never_outrun_submissions() {
        let sched = Arc::new(scheduler(4, all_succeed()));
        let done = Arc::new(AtomicBool::new(false));

        let s = sched.clone();
        let d = done.clone();
        let watcher = thread::spawn(move || {
            while !d.load(Ordering::SeqCst) {
                let stats = s.stats();
                let settled = stats.succeeded + stats.failed + stats.skipped + stats.abandoned;
                assert!(settled <= stats.submitted, "{stats:?}");
            }
        });

        let handles: Vec<_> = (0..300)
            .map(|_| {
                sched
                    .schedule_one_shot(JobType::AppLogClean, Duration::ZERO)
                    .unwrap()
            })
            .collect();
        for handle in handles {
            handle.wait(WAIT).unwrap().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        watcher.join().unwrap();

        let stats = sched.stats();
        assert_eq!(stats.submitted, 300);
        assert_eq!(stats.succeeded + stats.skipped, 300);
        assert_eq!(stats.abandoned, 0);
    }

    #[test]
    fn same_delay_runs_in_submission_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let bodies = JobBodies::new().register(JobType::PrinterSnmp, move |ctx| {
            s.lock().push(ctx.params["n"].as_u64().unwrap_or_default());
            JobOutcome::Success
        });
        let sched = scheduler(1, bodies);

        let handles: Vec<_> = (0..5u64)
            .map(|n| {
                sched
                    .schedule_one_shot_with(
                        JobType::PrinterSnmp,
                        Duration::from_millis(20),
                        serde_json::json!({"n": n}),
                    )
                    .unwrap()
            })
            .collect();
        for h in &handles {
            h.wait(WAIT).unwrap();
        }

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }
}
