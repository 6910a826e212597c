use printgate_core::{ResultBuilder, ResultCode, messages};
use printgate_infra::dispatcher::{ApiHandler, HandlerContext, HandlerError};

use crate::app::services::AppServices;

/// Placeholder for actions the server knows about but does not perform.
pub struct NotImplemented;

impl ApiHandler<AppServices> for NotImplemented {
    fn is_get_action(&self) -> bool {
        true
    }

    fn process(
        &self,
        ctx: &HandlerContext<'_, AppServices>,
        out: &mut ResultBuilder,
    ) -> Result<(), HandlerError> {
        out.set_result(
            ResultCode::Info,
            messages::NOT_IMPLEMENTED,
            [ctx.request.action.as_str()],
        );
        Ok(())
    }
}
