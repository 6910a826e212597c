use serde_json::json;

use printgate_core::{ResultBuilder, ResultCode, messages};
use printgate_infra::dispatcher::{ApiHandler, HandlerContext, HandlerError};

use crate::app::dto::UserDto;
use crate::app::services::{AppServices, ServiceError};

type Ctx<'a> = HandlerContext<'a, AppServices>;

/// Replace the TOTP secret of the target user (the requester when no target is given).
pub struct TotpReplace;

impl ApiHandler<AppServices> for TotpReplace {
    fn process(&self, ctx: &Ctx<'_>, out: &mut ResultBuilder) -> Result<(), HandlerError> {
        let user = ctx.subject();
        match ctx.services.users.replace_totp_secret(user) {
            Ok(record) => {
                out.set_response_payload(json!({
                    "user": user.as_str(),
                    "totp_revision": record.totp_revision,
                }));
                out.set_result_ok();
            }
            Err(ServiceError::UserNotFound(_)) => {
                out.set_result(ResultCode::Error, messages::USER_NOT_FOUND, [user.as_str()]);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

pub struct UserSetAttribute;

impl ApiHandler<AppServices> for UserSetAttribute {
    fn process(&self, ctx: &Ctx<'_>, out: &mut ResultBuilder) -> Result<(), HandlerError> {
        let name = ctx.request.require_str("name")?;
        let value = ctx.request.param_str("value").unwrap_or_default();
        let user = ctx.subject();

        match ctx.services.users.set_attribute(user, &name, &value) {
            Ok(()) => out.set_result_ok(),
            Err(ServiceError::UserNotFound(_)) => {
                out.set_result(ResultCode::Error, messages::USER_NOT_FOUND, [user.as_str()]);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

pub struct UserGet;

impl ApiHandler<AppServices> for UserGet {
    fn is_get_action(&self) -> bool {
        true
    }

    fn process(&self, ctx: &Ctx<'_>, out: &mut ResultBuilder) -> Result<(), HandlerError> {
        let user = ctx.subject();
        match ctx.services.users.get_user(user)? {
            Some(record) => {
                let payload = serde_json::to_value(UserDto::from(&record))
                    .map_err(|e| HandlerError::fault(e.to_string()))?;
                out.set_response_payload(payload);
                out.set_result_ok();
            }
            None => out.set_result(ResultCode::Error, messages::USER_NOT_FOUND, [user.as_str()]),
        }
        Ok(())
    }
}
