//! Application wiring: services, job bodies, handler catalog and the dispatcher.
//!
//! - `services.rs`: collaborator traits, in-memory implementations, job bodies
//! - `handlers/`: one handler per API action
//! - `dto.rs`: response payloads
//! - `errors.rs`: startup errors and failure-to-envelope mapping

use std::sync::Arc;

use tracing::{info, warn};

use printgate_core::{ApiResult, messages};
use printgate_infra::config::RuntimeConfig;
use printgate_infra::dispatcher::{ApiRequest, Dispatcher};
use printgate_infra::jobs::{InMemoryExecutionStore, JobRegistry, JobScheduler, SchedulerConfig};
use printgate_infra::locks::EntityLockManager;

pub mod dto;
pub mod errors;
pub mod handlers;
pub mod services;

use errors::AppError;
use services::{AppServices, InMemoryUserService, MaintenanceService, RecordingMaintenance, UserService};

/// A running application: dispatcher plus the job scheduler behind it.
#[derive(Debug, Clone)]
pub struct App {
    dispatcher: Arc<Dispatcher<AppServices>>,
}

/// Build the application with in-memory collaborators and no users.
pub fn build_app(config: &RuntimeConfig) -> Result<App, AppError> {
    build_app_with(
        config,
        Arc::new(InMemoryUserService::new()),
        Arc::new(RecordingMaintenance::new()),
    )
}

/// Build the application around the given collaborators.
pub fn build_app_with(
    config: &RuntimeConfig,
    users: Arc<dyn UserService>,
    maintenance: Arc<dyn MaintenanceService>,
) -> Result<App, AppError> {
    let scheduler = JobScheduler::start(
        SchedulerConfig::from(config),
        Arc::new(JobRegistry::new()),
        InMemoryExecutionStore::arc(config.job_retention),
        services::job_bodies(maintenance.clone()),
    )?;

    let services = AppServices {
        scheduler,
        users,
        maintenance,
    };
    let locks = Arc::new(EntityLockManager::new(config.lock_policy()));
    let dispatcher = handlers::register(Dispatcher::builder(locks, services)).build()?;

    info!(
        actions = dispatcher.actions().len(),
        workers = config.job_workers,
        "application ready"
    );
    Ok(App {
        dispatcher: Arc::new(dispatcher),
    })
}

impl App {
    pub fn dispatch(&self, request: &ApiRequest) -> ApiResult {
        self.dispatcher.dispatch(request)
    }

    /// Decode one JSON request and dispatch it. A line that is not a valid request yields
    /// `ERROR msg-invalid-parameter [detail]`.
    pub fn handle_line(&self, line: &str) -> ApiResult {
        match serde_json::from_str::<ApiRequest>(line) {
            Ok(request) => self.dispatch(&request),
            Err(e) => {
                warn!(error = %e, "malformed request line");
                ApiResult::error(messages::INVALID_PARAMETER, [format!("request: {e}")])
            }
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<AppServices> {
        &self.dispatcher
    }

    pub fn services(&self) -> &AppServices {
        self.dispatcher.services()
    }

    /// Stop accepting jobs and wait for the workers; idempotent.
    pub fn shutdown(&self) {
        self.services().scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printgate_core::ResultCode;

    fn config() -> RuntimeConfig {
        RuntimeConfig::from_lookup(|_| None).unwrap()
    }

    #[test]
    fn catalog_covers_every_action() {
        let app = build_app(&config()).unwrap();
        let mut actions = app.dispatcher().actions();
        actions.sort_unstable();
        assert_eq!(
            actions,
            vec![
                handlers::DB_BACKUP,
                handlers::JOB_STATUS,
                handlers::NOT_IMPLEMENTED,
                handlers::TICKET_PRINT_CANCEL,
                handlers::TOTP_REPLACE,
                handlers::USER_GET,
                handlers::USER_HOME_CLEAN,
                handlers::USER_SET_ATTRIBUTE,
            ]
        );
        assert_eq!(app.dispatcher().is_get_action(handlers::JOB_STATUS), Some(true));
        assert_eq!(app.dispatcher().is_get_action(handlers::DB_BACKUP), Some(false));
        app.shutdown();
    }

    #[test]
    fn malformed_line_is_an_error_envelope() {
        let app = build_app(&config()).unwrap();
        let result = app.handle_line("{not json");
        assert_eq!(result.code, ResultCode::Error);
        assert_eq!(result.message_key.as_deref(), Some(messages::INVALID_PARAMETER));

        let missing_requester = app.handle_line(r#"{"action":"jobStatus"}"#);
        assert_eq!(missing_requester.code, ResultCode::Error);
        app.shutdown();
    }
}
