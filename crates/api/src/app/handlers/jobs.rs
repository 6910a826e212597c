use std::time::Duration;

use serde_json::json;

use printgate_core::{ResultBuilder, ResultCode, messages};
use printgate_infra::dispatcher::{ApiHandler, HandlerContext, HandlerError};
use printgate_infra::jobs::{ExecutionStore, JobHandle, JobType};

use crate::app::dto::{JobStatusDto, JobSubmittedDto};
use crate::app::errors::scheduling_error;
use crate::app::services::AppServices;

type Ctx<'a> = HandlerContext<'a, AppServices>;

fn submitted(handle: &JobHandle) -> Result<serde_json::Value, HandlerError> {
    serde_json::to_value(JobSubmittedDto {
        job_id: handle.job_id(),
        fire_at: handle.fire_at(),
    })
    .map_err(|e| HandlerError::fault(e.to_string()))
}

/// Start a database backup unless one is already reserved or running.
pub struct DbBackup;

impl ApiHandler<AppServices> for DbBackup {
    fn process(&self, ctx: &Ctx<'_>, out: &mut ResultBuilder) -> Result<(), HandlerError> {
        let scheduler = &ctx.services.scheduler;
        match scheduler.schedule_exclusive(JobType::DbBackup, Duration::ZERO, json!({})) {
            Ok(handle) => {
                out.set_response_payload(submitted(&handle)?);
                out.set_result(ResultCode::Ok, messages::BACKUP_BUSY, Vec::<String>::new());
            }
            Err(e) if e.is_already_running() => {
                out.set_result(ResultCode::Warn, messages::BACKUP_ALREADY_BUSY, Vec::<String>::new());
            }
            Err(e) => out.set(scheduling_error(&e)),
        }
        Ok(())
    }
}

/// Remove orphaned home directories; refused while a cleanup or a backup is in flight.
///
/// The cleanup itself is submitted exclusively, so a queued but not yet started cleanup
/// already counts as in flight.
pub struct UserHomeClean;

impl ApiHandler<AppServices> for UserHomeClean {
    fn process(&self, ctx: &Ctx<'_>, out: &mut ResultBuilder) -> Result<(), HandlerError> {
        let scheduler = &ctx.services.scheduler;

        if scheduler.is_busy(&[JobType::DbBackup]) {
            out.set_result(ResultCode::Warn, messages::JOB_BUSY, [JobType::DbBackup.as_str()]);
            return Ok(());
        }

        match scheduler.schedule_exclusive(JobType::UserHomeClean, Duration::ZERO, json!({})) {
            Ok(handle) => {
                out.set_response_payload(submitted(&handle)?);
                out.set_result(ResultCode::Ok, messages::HOME_CLEAN_STARTED, Vec::<String>::new());
            }
            Err(e) if e.is_already_running() => {
                out.set_result(
                    ResultCode::Warn,
                    messages::JOB_BUSY,
                    [JobType::UserHomeClean.as_str()],
                );
            }
            Err(e) => out.set(scheduling_error(&e)),
        }
        Ok(())
    }
}

/// Schedule the follow-up work for a cancelled print ticket.
pub struct TicketPrintCancel;

impl ApiHandler<AppServices> for TicketPrintCancel {
    fn process(&self, ctx: &Ctx<'_>, out: &mut ResultBuilder) -> Result<(), HandlerError> {
        let ticket = ctx.request.require_str("ticket")?;
        let delay = Duration::from_secs(ctx.request.param_u64("delaySecs")?.unwrap_or(0));

        let scheduled = ctx.services.scheduler.schedule_one_shot_with(
            JobType::TicketPrintCancel,
            delay,
            json!({ "ticket": ticket.as_str() }),
        );
        match scheduled {
            Ok(handle) => {
                out.set_response_payload(submitted(&handle)?);
                out.set_result(ResultCode::Ok, messages::TICKET_CANCEL_SCHEDULED, [ticket]);
            }
            Err(e) => out.set(scheduling_error(&e)),
        }
        Ok(())
    }
}

/// Registry snapshot plus scheduler statistics.
pub struct JobStatus;

impl ApiHandler<AppServices> for JobStatus {
    fn is_get_action(&self) -> bool {
        true
    }

    fn process(&self, ctx: &Ctx<'_>, out: &mut ResultBuilder) -> Result<(), HandlerError> {
        let scheduler = &ctx.services.scheduler;
        let executions = scheduler
            .store()
            .counts()
            .map_err(|e| HandlerError::fault(e.to_string()))?;

        let dto = JobStatusDto {
            jobs: scheduler.registry().snapshot(),
            stats: scheduler.stats(),
            executions,
            accepting: scheduler.is_accepting(),
        };
        let payload = serde_json::to_value(dto).map_err(|e| HandlerError::fault(e.to_string()))?;

        out.set_response_payload(payload);
        out.set_result_ok();
        Ok(())
    }
}
