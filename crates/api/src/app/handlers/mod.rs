//! Action catalog: one stateless handler per API action.
//!
//! Handlers are thin: validate parameters, call a service or the scheduler, set the result.

use printgate_infra::dispatcher::DispatcherBuilder;

use crate::app::services::AppServices;

pub mod jobs;
pub mod system;
pub mod users;

pub const DB_BACKUP: &str = "dbBackup";
pub const USER_HOME_CLEAN: &str = "userHomeClean";
pub const TICKET_PRINT_CANCEL: &str = "ticketPrintCancel";
pub const JOB_STATUS: &str = "jobStatus";
pub const TOTP_REPLACE: &str = "totpReplace";
pub const USER_SET_ATTRIBUTE: &str = "userSetAttribute";
pub const USER_GET: &str = "userGet";
pub const NOT_IMPLEMENTED: &str = "notImplemented";

/// Register every action handler.
pub fn register(builder: DispatcherBuilder<AppServices>) -> DispatcherBuilder<AppServices> {
    builder
        .register(DB_BACKUP, jobs::DbBackup)
        .register(USER_HOME_CLEAN, jobs::UserHomeClean)
        .register(TICKET_PRINT_CANCEL, jobs::TicketPrintCancel)
        .register(JOB_STATUS, jobs::JobStatus)
        .register(TOTP_REPLACE, users::TotpReplace)
        .register(USER_SET_ATTRIBUTE, users::UserSetAttribute)
        .register(USER_GET, users::UserGet)
        .register(NOT_IMPLEMENTED, system::NotImplemented)
}
