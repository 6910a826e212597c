//! Collaborator services and their wiring into the job scheduler.
//!
//! Handlers only see the traits; the in-memory implementations back the binary and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use printgate_core::PrincipalKey;
use printgate_infra::jobs::{JobBodies, JobOutcome, JobScheduler, JobType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("user not found: {0}")]
    UserNotFound(PrincipalKey),
    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Stored user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub key: PrincipalKey,
    pub attributes: BTreeMap<String, String>,
    pub totp_secret: Option<String>,
    /// Bumped on every TOTP secret replacement.
    pub totp_revision: u64,
    pub totp_replaced_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(key: PrincipalKey) -> Self {
        Self {
            key,
            attributes: BTreeMap::new(),
            totp_secret: None,
            totp_revision: 0,
            totp_replaced_at: None,
        }
    }
}

pub trait UserService: Send + Sync {
    fn get_user(&self, key: &PrincipalKey) -> Result<Option<UserRecord>, ServiceError>;

    /// Generate and store a new TOTP secret; returns the updated record.
    fn replace_totp_secret(&self, key: &PrincipalKey) -> Result<UserRecord, ServiceError>;

    fn set_attribute(&self, key: &PrincipalKey, name: &str, value: &str)
    -> Result<(), ServiceError>;
}

/// The business side of the administrative jobs.
pub trait MaintenanceService: Send + Sync {
    fn backup_database(&self) -> Result<(), ServiceError>;

    fn clean_doc_log(&self) -> Result<(), ServiceError>;

    fn clean_app_log(&self) -> Result<(), ServiceError>;

    /// Returns the number of orphaned home directories removed.
    fn clean_user_homes(&self) -> Result<usize, ServiceError>;

    fn cancel_ticket_print(&self, ticket: &str) -> Result<(), ServiceError>;

    fn poll_printers(&self) -> Result<(), ServiceError>;
}

/// Everything handlers can reach.
pub struct AppServices {
    pub scheduler: JobScheduler,
    pub users: Arc<dyn UserService>,
    pub maintenance: Arc<dyn MaintenanceService>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// One job body per job type, each delegating to the maintenance service.
pub fn job_bodies(maintenance: Arc<dyn MaintenanceService>) -> JobBodies {
    let m = maintenance.clone();
    let bodies = JobBodies::new().register(JobType::DbBackup, move |_| m.backup_database().into());

    let m = maintenance.clone();
    let bodies = bodies.register(JobType::DocLogClean, move |_| m.clean_doc_log().into());

    let m = maintenance.clone();
    let bodies = bodies.register(JobType::AppLogClean, move |_| m.clean_app_log().into());

    let m = maintenance.clone();
    let bodies = bodies.register(JobType::UserHomeClean, move |ctx| {
        m.clean_user_homes()
            .map(|removed| info!(job_id = %ctx.job_id, removed, "user homes cleaned"))
            .into()
    });

    let m = maintenance.clone();
    let bodies = bodies.register(JobType::TicketPrintCancel, move |ctx| {
        match ctx.params.get("ticket").and_then(|t| t.as_str()) {
            Some(ticket) => m.cancel_ticket_print(ticket).into(),
            None => JobOutcome::failure("missing ticket parameter"),
        }
    });

    let m = maintenance;
    bodies.register(JobType::PrinterSnmp, move |_| m.poll_printers().into())
}

// -------------------------
// In-memory implementations
// -------------------------

/// User store kept in process memory.
///
/// Updates are plain read-modify-write sequences; callers serialize per principal through
/// the dispatcher's entity lock.
#[derive(Debug, Default)]
pub struct InMemoryUserService {
    users: RwLock<HashMap<PrincipalKey, UserRecord>>,
}

impl InMemoryUserService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = PrincipalKey>,
    {
        let users = keys
            .into_iter()
            .map(|k| (k.clone(), UserRecord::new(k)))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    pub fn insert(&self, record: UserRecord) {
        self.users.write().insert(record.key.clone(), record);
    }

    fn load(&self, key: &PrincipalKey) -> Result<UserRecord, ServiceError> {
        self.users
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ServiceError::UserNotFound(key.clone()))
    }
}

impl UserService for InMemoryUserService {
    fn get_user(&self, key: &PrincipalKey) -> Result<Option<UserRecord>, ServiceError> {
        Ok(self.users.read().get(key).cloned())
    }

    fn replace_totp_secret(&self, key: &PrincipalKey) -> Result<UserRecord, ServiceError> {
        let mut record = self.load(key)?;
        // Widens the window in which an unserialized caller would lose an update.
        thread::yield_now();
        record.totp_secret = Some(Uuid::now_v7().simple().to_string());
        record.totp_revision += 1;
        record.totp_replaced_at = Some(Utc::now());
        self.insert(record.clone());
        debug!(principal = %key, revision = record.totp_revision, "totp secret replaced");
        Ok(record)
    }

    fn set_attribute(
        &self,
        key: &PrincipalKey,
        name: &str,
        value: &str,
    ) -> Result<(), ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::Invalid("attribute name must not be blank".into()));
        }
        let mut record = self.load(key)?;
        record
            .attributes
            .insert(name.trim().to_string(), value.to_string());
        self.insert(record);
        Ok(())
    }
}

/// Counts of maintenance operations performed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceCalls {
    pub backups: u64,
    pub doc_log_cleans: u64,
    pub app_log_cleans: u64,
    pub home_cleans: u64,
    pub printer_polls: u64,
    pub cancelled_tickets: Vec<String>,
}

/// Maintenance service that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingMaintenance {
    backups: AtomicU64,
    doc_log_cleans: AtomicU64,
    app_log_cleans: AtomicU64,
    home_cleans: AtomicU64,
    printer_polls: AtomicU64,
    cancelled_tickets: Mutex<Vec<String>>,
}

impl RecordingMaintenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> MaintenanceCalls {
        MaintenanceCalls {
            backups: self.backups.load(Ordering::Relaxed),
            doc_log_cleans: self.doc_log_cleans.load(Ordering::Relaxed),
            app_log_cleans: self.app_log_cleans.load(Ordering::Relaxed),
            home_cleans: self.home_cleans.load(Ordering::Relaxed),
            printer_polls: self.printer_polls.load(Ordering::Relaxed),
            cancelled_tickets: self.cancelled_tickets.lock().clone(),
        }
    }
}

impl MaintenanceService for RecordingMaintenance {
    fn backup_database(&self) -> Result<(), ServiceError> {
        self.backups.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn clean_doc_log(&self) -> Result<(), ServiceError> {
        self.doc_log_cleans.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn clean_app_log(&self) -> Result<(), ServiceError> {
        self.app_log_cleans.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn clean_user_homes(&self) -> Result<usize, ServiceError> {
        self.home_cleans.fetch_add(1, Ordering::Relaxed);
        Ok(0)
    }

    fn cancel_ticket_print(&self, ticket: &str) -> Result<(), ServiceError> {
        self.cancelled_tickets.lock().push(ticket.to_string());
        Ok(())
    }

    fn poll_printers(&self) -> Result<(), ServiceError> {
        self.printer_polls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
