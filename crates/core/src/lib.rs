//! `printgate-core`: shared building blocks for the handler layer.
//!
//! This crate contains **pure data** primitives (no threads, no IO): identifiers,
//! the domain error model and the result envelope every handler produces.

pub mod error;
pub mod id;
pub mod messages;
pub mod result;

pub use error::DomainError;
pub use id::{PrincipalKey, RequestId};
pub use result::{ApiResult, ResultBuilder, ResultCode};
