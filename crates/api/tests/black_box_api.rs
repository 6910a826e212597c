//! End-to-end scenarios through the public application surface.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};

use printgate_api::app::services::{
    InMemoryUserService, MaintenanceCalls, MaintenanceService, RecordingMaintenance, ServiceError,
};
use printgate_api::app::{App, build_app_with};
use printgate_core::{PrincipalKey, ResultCode, messages};
use printgate_infra::config::RuntimeConfig;
use printgate_infra::dispatcher::ApiRequest;
use printgate_infra::jobs::{ExecutionStore, JobId, JobStatus};

const WAIT: Duration = Duration::from_secs(5);

fn key(s: &str) -> PrincipalKey {
    PrincipalKey::new(s).unwrap()
}

/// Backups (or ticket cancellations) block until released; optionally the first backup
/// panics.
#[derive(Default)]
struct GatedMaintenance {
    inner: RecordingMaintenance,
    gate: Option<Mutex<mpsc::Receiver<()>>>,
    ticket_gate: Option<Mutex<mpsc::Receiver<()>>>,
    crash_first_backup: Mutex<bool>,
}

impl GatedMaintenance {
    fn gated() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let m = Self {
            gate: Some(Mutex::new(rx)),
            ..Self::default()
        };
        (m, tx)
    }

    fn gated_tickets() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let m = Self {
            ticket_gate: Some(Mutex::new(rx)),
            ..Self::default()
        };
        (m, tx)
    }

    fn crashing() -> Self {
        Self {
            crash_first_backup: Mutex::new(true),
            ..Self::default()
        }
    }

    fn calls(&self) -> MaintenanceCalls {
        self.inner.calls()
    }
}

impl MaintenanceService for GatedMaintenance {
    fn backup_database(&self) -> Result<(), ServiceError> {
        if std::mem::replace(&mut *self.crash_first_backup.lock(), false) {
            panic!("backup volume not mounted");
        }
        if let Some(gate) = &self.gate {
            let _ = gate.lock().recv_timeout(WAIT);
        }
        self.inner.backup_database()
    }

    fn clean_doc_log(&self) -> Result<(), ServiceError> {
        self.inner.clean_doc_log()
    }

    fn clean_app_log(&self) -> Result<(), ServiceError> {
        self.inner.clean_app_log()
    }

    fn clean_user_homes(&self) -> Result<usize, ServiceError> {
        self.inner.clean_user_homes()
    }

    fn cancel_ticket_print(&self, ticket: &str) -> Result<(), ServiceError> {
        if let Some(gate) = &self.ticket_gate {
            let _ = gate.lock().recv_timeout(WAIT);
        }
        self.inner.cancel_ticket_print(ticket)
    }

    fn poll_printers(&self) -> Result<(), ServiceError> {
        self.inner.poll_printers()
    }
}

fn config(workers: usize) -> RuntimeConfig {
    RuntimeConfig::from_lookup(|k| match k {
        "PRINTGATE_LOCK_TIMEOUT_MS" => Some("5000".to_string()),
        "PRINTGATE_SCHEDULER_NAME" => Some("bb-jobs".to_string()),
        "PRINTGATE_JOB_WORKERS" => Some(workers.to_string()),
        _ => None,
    })
    .unwrap()
}

fn spawn_app_with_workers(maintenance: Arc<GatedMaintenance>, workers: usize) -> App {
    let users = InMemoryUserService::with_users([key("admin"), key("alice")]);
    build_app_with(&config(workers), Arc::new(users), maintenance).unwrap()
}

fn spawn_app(maintenance: Arc<GatedMaintenance>) -> App {
    spawn_app_with_workers(maintenance, 2)
}

fn wait_for_job(app: &App, payload: &Option<JsonValue>) -> Option<JobStatus> {
    let job_id: JobId = serde_json::from_value(payload.as_ref()?["job_id"].clone()).ok()?;
    app.services()
        .scheduler
        .store()
        .wait_terminal(job_id, WAIT)
        .ok()?
        .map(|e| e.status)
}

#[test]
fn backup_is_admitted_then_busy_then_admitted_again() {
    let (maintenance, release) = GatedMaintenance::gated();
    let maintenance = Arc::new(maintenance);
    let app = spawn_app(maintenance.clone());

    let first = app.dispatch(&ApiRequest::new("dbBackup", key("admin")));
    assert_eq!(first.code, ResultCode::Ok);
    assert_eq!(first.message_key.as_deref(), Some(messages::BACKUP_BUSY));

    let second = app.dispatch(&ApiRequest::new("dbBackup", key("alice")));
    assert_eq!(second.code, ResultCode::Warn);
    assert_eq!(second.message_key.as_deref(), Some(messages::BACKUP_ALREADY_BUSY));

    // Home cleanup refuses to start while the backup holds its slot.
    let clean = app.dispatch(&ApiRequest::new("userHomeClean", key("admin")));
    assert_eq!(clean.code, ResultCode::Warn);
    assert_eq!(clean.message_key.as_deref(), Some(messages::JOB_BUSY));
    assert_eq!(clean.params, vec!["DB_BACKUP".to_string()]);

    release.send(()).unwrap();
    assert_eq!(wait_for_job(&app, &first.payload), Some(JobStatus::Succeeded));

    let third = app.dispatch(&ApiRequest::new("dbBackup", key("admin")));
    assert_eq!(third.code, ResultCode::Ok);
    release.send(()).unwrap();
    assert_eq!(wait_for_job(&app, &third.payload), Some(JobStatus::Succeeded));

    assert_eq!(maintenance.calls().backups, 2);
    app.shutdown();
}

#[test]
fn concurrent_totp_replacements_are_serialized_per_user() {
    let app = spawn_app(Arc::new(GatedMaintenance::default()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let app = app.clone();
            thread::spawn(move || {
                let request = if i % 2 == 0 {
                    ApiRequest::new("totpReplace", key("alice"))
                } else {
                    ApiRequest::new("totpReplace", key("admin")).with_target(key("alice"))
                };
                for _ in 0..10 {
                    assert_eq!(app.dispatch(&request).code, ResultCode::Ok);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let user = app.dispatch(&ApiRequest::new("userGet", key("alice")));
    assert_eq!(user.code, ResultCode::Ok);
    let payload = user.payload.unwrap();
    assert_eq!(payload["totp_revision"], json!(80));
    assert_eq!(payload["has_totp"], json!(true));
    assert_eq!(app.dispatcher().locks().active_keys(), 0);
    app.shutdown();
}

#[test]
fn crashing_backup_releases_its_job_type() {
    let maintenance = Arc::new(GatedMaintenance::crashing());
    let app = spawn_app(maintenance.clone());

    let first = app.dispatch(&ApiRequest::new("dbBackup", key("admin")));
    assert_eq!(first.code, ResultCode::Ok);
    match wait_for_job(&app, &first.payload) {
        Some(JobStatus::Failed { error }) => assert!(error.contains("backup volume not mounted")),
        other => panic!("expected a failed backup, got {other:?}"),
    }

    let retry = app.dispatch(&ApiRequest::new("dbBackup", key("admin")));
    assert_eq!(retry.code, ResultCode::Ok);
    assert_eq!(wait_for_job(&app, &retry.payload), Some(JobStatus::Succeeded));
    assert_eq!(maintenance.calls().backups, 1);
    app.shutdown();
}

#[test]
fn json_lines_round_trip_as_envelopes() {
    let app = spawn_app(Arc::new(GatedMaintenance::default()));

    let info = app.handle_line(r#"{"action":"notImplemented","requester":"admin"}"#);
    let encoded = serde_json::to_value(&info).unwrap();
    assert_eq!(
        encoded,
        json!({
            "code": "INFO",
            "message_key": messages::NOT_IMPLEMENTED,
            "params": ["notImplemented"],
        })
    );

    let unknown = app.handle_line(r#"{"action":"printerReboot","requester":"admin"}"#);
    assert_eq!(unknown.code, ResultCode::Error);
    assert_eq!(unknown.message_key.as_deref(), Some(messages::UNKNOWN_ACTION));
    assert_eq!(unknown.params, vec!["printerReboot".to_string()]);

    let malformed = app.handle_line("dbBackup please");
    assert_eq!(malformed.code, ResultCode::Error);
    assert_eq!(malformed.message_key.as_deref(), Some(messages::INVALID_PARAMETER));
    app.shutdown();
}

#[test]
fn ticket_cancellation_requires_a_ticket() {
    let maintenance = Arc::new(GatedMaintenance::default());
    let app = spawn_app(maintenance.clone());

    let missing = app.dispatch(&ApiRequest::new("ticketPrintCancel", key("admin")));
    assert_eq!(missing.code, ResultCode::Error);
    assert_eq!(missing.message_key.as_deref(), Some(messages::INVALID_PARAMETER));

    let scheduled = app.dispatch(
        &ApiRequest::new("ticketPrintCancel", key("admin"))
            .with_params(json!({ "ticket": "T-1042" })),
    );
    assert_eq!(scheduled.code, ResultCode::Ok);
    assert_eq!(scheduled.message_key.as_deref(), Some(messages::TICKET_CANCEL_SCHEDULED));
    assert_eq!(scheduled.params, vec!["T-1042".to_string()]);
    assert_eq!(wait_for_job(&app, &scheduled.payload), Some(JobStatus::Succeeded));
    assert_eq!(maintenance.calls().cancelled_tickets, vec!["T-1042".to_string()]);
    app.shutdown();
}

#[test]
fn user_attributes_and_lookup() {
    let app = spawn_app(Arc::new(GatedMaintenance::default()));

    let set = app.dispatch(
        &ApiRequest::new("userSetAttribute", key("admin"))
            .with_target(key("alice"))
            .with_params(json!({ "name": "pageQuota", "value": "250" })),
    );
    assert_eq!(set.code, ResultCode::Ok);

    let alice = app.dispatch(&ApiRequest::new("userGet", key("admin")).with_target(key("alice")));
    assert_eq!(alice.payload.unwrap()["attributes"]["pageQuota"], json!("250"));

    let ghost = app.dispatch(&ApiRequest::new("userGet", key("ghost")));
    assert_eq!(ghost.code, ResultCode::Error);
    assert_eq!(ghost.message_key.as_deref(), Some(messages::USER_NOT_FOUND));
    assert_eq!(ghost.params, vec!["ghost".to_string()]);

    let totp = app.dispatch(&ApiRequest::new("totpReplace", key("ghost")));
    assert_eq!(totp.message_key.as_deref(), Some(messages::USER_NOT_FOUND));
    app.shutdown();
}

#[test]
fn job_status_reports_every_type_and_shutdown_refuses_work() {
    let app = spawn_app(Arc::new(GatedMaintenance::default()));

    let clean = app.dispatch(&ApiRequest::new("userHomeClean", key("admin")));
    assert_eq!(clean.code, ResultCode::Ok);
    assert_eq!(clean.message_key.as_deref(), Some(messages::HOME_CLEAN_STARTED));
    assert_eq!(wait_for_job(&app, &clean.payload), Some(JobStatus::Succeeded));

    let status = app.dispatch(&ApiRequest::new("jobStatus", key("admin")));
    assert_eq!(status.code, ResultCode::Ok);
    let payload = status.payload.unwrap();
    assert_eq!(payload["jobs"].as_array().map(Vec::len), Some(6));
    assert_eq!(payload["accepting"], json!(true));
    assert_eq!(payload["stats"]["succeeded"], json!(1));

    app.shutdown();
    app.shutdown();
    let refused = app.dispatch(&ApiRequest::new("dbBackup", key("admin")));
    assert_eq!(refused.code, ResultCode::Error);
    assert_eq!(refused.message_key.as_deref(), Some(messages::SCHEDULING_ERROR));
}

#[test]
fn queued_home_cleanup_rejects_a_second_request() {
    let (maintenance, release) = GatedMaintenance::gated_tickets();
    let maintenance = Arc::new(maintenance);
    let app = spawn_app_with_workers(maintenance.clone(), 1);

    // Occupy the only worker so the cleanup stays queued.
    let blocker = app.dispatch(
        &ApiRequest::new("ticketPrintCancel", key("admin"))
            .with_params(json!({ "ticket": "T-1" })),
    );
    assert_eq!(blocker.code, ResultCode::Ok);

    let first = app.dispatch(&ApiRequest::new("userHomeClean", key("admin")));
    assert_eq!(first.code, ResultCode::Ok);
    assert_eq!(first.message_key.as_deref(), Some(messages::HOME_CLEAN_STARTED));

    let second = app.dispatch(&ApiRequest::new("userHomeClean", key("alice")));
    assert_eq!(second.code, ResultCode::Warn);
    assert_eq!(second.message_key.as_deref(), Some(messages::JOB_BUSY));
    assert_eq!(second.params, vec!["USER_HOME_CLEAN".to_string()]);

    release.send(()).unwrap();
    assert_eq!(wait_for_job(&app, &blocker.payload), Some(JobStatus::Succeeded));
    assert_eq!(wait_for_job(&app, &first.payload), Some(JobStatus::Succeeded));
    assert_eq!(maintenance.calls().home_cleans, 1);

    // Once the cleanup has finished a new one is admitted.
    let again = app.dispatch(&ApiRequest::new("userHomeClean", key("admin")));
    assert_eq!(again.code, ResultCode::Ok);
    assert_eq!(wait_for_job(&app, &again.payload), Some(JobStatus::Succeeded));
    assert_eq!(maintenance.calls().home_cleans, 2);
    app.shutdown();
}
