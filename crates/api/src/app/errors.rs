//! Consistent mapping of failures to result envelopes.

use thiserror::Error;

use printgate_core::{ApiResult, DomainError, messages};
use printgate_infra::config::ConfigError;
use printgate_infra::dispatcher::{CatalogError, HandlerError};
use printgate_infra::jobs::SchedulingError;

use crate::app::services::ServiceError;

/// Startup failure of the application wiring.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl From<ServiceError> for HandlerError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::UserNotFound(key) => DomainError::not_found(key.to_string()).into(),
            ServiceError::Invalid(msg) => DomainError::validation(msg).into(),
        }
    }
}

/// `SchedulingError` → `ERROR msg-scheduling-error [cause]`.
pub fn scheduling_error(err: &SchedulingError) -> ApiResult {
    ApiResult::error(messages::SCHEDULING_ERROR, [err.to_string()])
}
