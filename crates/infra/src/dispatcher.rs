//! Request dispatch: action name → handler, under the principal lock.
//!
//! ## Dispatch flow
//!
//! ```text
//! ApiRequest
//!   ↓
//! 1. Resolve handler from the catalog (fixed at startup)
//!   ↓
//! 2. Pick the lock key: target principal, else requester for mutating actions,
//!    else none (read-only action without a target)
//!   ↓
//! 3. EntityLockManager::with_lock(key, handler.process)
//!   ↓
//! 4. Turn the ResultBuilder (or the failure) into an ApiResult
//! ```
//!
//! ## Error Semantics
//!
//! Nothing escapes [`Dispatcher::dispatch`]: every failure becomes an `ERROR` envelope.
//!
//! - **Unknown action** → `msg-unknown-action [action]`
//! - **Bad parameter** (`HandlerError::InvalidParameter`) → `msg-invalid-parameter [detail]`
//! - **Handler error or panic** → `msg-handler-fault [description]`
//! - **No result set** → `msg-handler-no-result [action]`
//! - **Lock timeout** → `msg-lock-timeout [principal]`
//!
//! A handler that reports a precondition (busy job, missing record) does so by setting a
//! `WARN`/`ERROR` result itself and returning `Ok(())`.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use printgate_core::{
    ApiResult, DomainError, PrincipalKey, RequestId, ResultBuilder, messages,
};

use crate::locks::{EntityLockManager, LockError};

/// One API call as the dispatcher sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    #[serde(default)]
    pub request_id: RequestId,
    pub action: String,
    #[serde(default)]
    pub params: JsonValue,
    /// Principal making the call.
    pub requester: PrincipalKey,
    /// Principal the call mutates, if different from the requester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<PrincipalKey>,
}

impl ApiRequest {
    pub fn new(action: impl Into<String>, requester: PrincipalKey) -> Self {
        Self {
            request_id: RequestId::new(),
            action: action.into(),
            params: JsonValue::Null,
            requester,
            target: None,
        }
    }

    pub fn with_params(mut self, params: JsonValue) -> Self {
        self.params = params;
        self
    }

    pub fn with_target(mut self, target: PrincipalKey) -> Self {
        self.target = Some(target);
        self
    }

    /// String parameter, if present. Numbers and booleans are rendered as text.
    pub fn param_str(&self, name: &str) -> Option<String> {
        match self.params.get(name)? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            JsonValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Non-blank string parameter or `HandlerError::InvalidParameter`.
    pub fn require_str(&self, name: &str) -> Result<String, HandlerError> {
        self.param_str(name)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| HandlerError::invalid_parameter(name, "required"))
    }

    /// Optional unsigned integer parameter (accepts numeric strings).
    pub fn param_u64(&self, name: &str) -> Result<Option<u64>, HandlerError> {
        match self.params.get(name) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(JsonValue::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| HandlerError::invalid_parameter(name, "expected a non-negative integer")),
            Some(JsonValue::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| HandlerError::invalid_parameter(name, "expected a non-negative integer")),
            Some(_) => Err(HandlerError::invalid_parameter(
                name,
                "expected a non-negative integer",
            )),
        }
    }
}

/// Everything a handler invocation can see.
#[derive(Debug)]
pub struct HandlerContext<'a, S> {
    pub request: &'a ApiRequest,
    /// Principal whose lock is held for this invocation, if any.
    pub locked: Option<&'a PrincipalKey>,
    pub services: &'a S,
}

impl<S> HandlerContext<'_, S> {
    /// The principal the call acts on: the target if given, else the requester.
    pub fn subject(&self) -> &PrincipalKey {
        self.request.target.as_ref().unwrap_or(&self.request.requester)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{0}")]
    Fault(String),
}

impl HandlerError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn fault(msg: impl Into<String>) -> Self {
        Self::Fault(msg.into())
    }

    fn into_result(self) -> ApiResult {
        match self {
            HandlerError::InvalidParameter { .. } => {
                ApiResult::error(messages::INVALID_PARAMETER, [self.to_string()])
            }
            other => ApiResult::error(messages::HANDLER_FAULT, [other.to_string()]),
        }
    }
}

/// Stateless handler for one API action.
///
/// `S` is the bundle of collaborator services the catalog is built with.
pub trait ApiHandler<S>: Send + Sync {
    /// Read-only actions skip the principal lock unless the request names a target.
    fn is_get_action(&self) -> bool {
        false
    }

    /// Handle one call, recording the terminal result in `out`.
    fn process(&self, ctx: &HandlerContext<'_, S>, out: &mut ResultBuilder)
    -> Result<(), HandlerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("action {0:?} registered twice")]
    Duplicate(String),
    #[error("action name must not be blank")]
    BlankAction,
}

/// Builds the immutable action catalog.
pub struct DispatcherBuilder<S> {
    locks: Arc<EntityLockManager>,
    services: S,
    handlers: HashMap<String, Box<dyn ApiHandler<S>>>,
    error: Option<CatalogError>,
}

impl<S> DispatcherBuilder<S> {
    pub fn register<H>(mut self, action: impl Into<String>, handler: H) -> Self
    where
        H: ApiHandler<S> + 'static,
    {
        let action = action.into();
        if self.error.is_some() {
            return self;
        }
        if action.trim().is_empty() {
            self.error = Some(CatalogError::BlankAction);
        } else if self.handlers.contains_key(&action) {
            self.error = Some(CatalogError::Duplicate(action));
        } else {
            self.handlers.insert(action, Box::new(handler));
        }
        self
    }

    pub fn build(self) -> Result<Dispatcher<S>, CatalogError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(Dispatcher {
            locks: self.locks,
            services: self.services,
            handlers: self.handlers,
        })
    }
}

/// Resolves actions to handlers and runs them under the principal lock.
pub struct Dispatcher<S> {
    locks: Arc<EntityLockManager>,
    services: S,
    handlers: HashMap<String, Box<dyn ApiHandler<S>>>,
}

impl<S> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("actions", &self.actions())
            .field("locks", &self.locks)
            .finish()
    }
}

impl<S> Dispatcher<S> {
    pub fn builder(locks: Arc<EntityLockManager>, services: S) -> DispatcherBuilder<S> {
        DispatcherBuilder {
            locks,
            services,
            handlers: HashMap::new(),
            error: None,
        }
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    pub fn locks(&self) -> &Arc<EntityLockManager> {
        &self.locks
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    /// `None` for unknown actions.
    pub fn is_get_action(&self, action: &str) -> Option<bool> {
        self.handlers.get(action).map(|h| h.is_get_action())
    }

    /// Run the handler for `request` and return its envelope. Never panics on handler
    /// failure; every outcome is an [`ApiResult`].
    pub fn dispatch(&self, request: &ApiRequest) -> ApiResult {
        let span = info_span!(
            "dispatch",
            request_id = %request.request_id,
            action = %request.action
        );
        let _entered = span.enter();
        let started = Instant::now();

        let Some(handler) = self.handlers.get(&request.action) else {
            warn!(requester = %request.requester, "unknown action");
            return ApiResult::error(messages::UNKNOWN_ACTION, [request.action.as_str()]);
        };

        let lock_key = request
            .target
            .as_ref()
            .or((!handler.is_get_action()).then_some(&request.requester));

        let result = match lock_key {
            Some(key) => self
                .locks
                .with_lock(key, || self.invoke(handler.as_ref(), request, Some(key)))
                .unwrap_or_else(|LockError::Timeout { key, waited }| {
                    warn!(principal = %key, waited_ms = waited.as_millis() as u64, "dispatch lock timeout");
                    ApiResult::error(messages::LOCK_TIMEOUT, [key.to_string()])
                }),
            None => self.invoke(handler.as_ref(), request, None),
        };

        info!(
            requester = %request.requester,
            principal = lock_key.map(PrincipalKey::as_str),
            code = %result.code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request dispatched"
        );
        result
    }

    fn invoke(
        &self,
        handler: &dyn ApiHandler<S>,
        request: &ApiRequest,
        locked: Option<&PrincipalKey>,
    ) -> ApiResult {
        let ctx = HandlerContext {
            request,
            locked,
            services: &self.services,
        };

        let run = catch_unwind(AssertUnwindSafe(|| {
            let mut out = ResultBuilder::new();
            let processed = handler.process(&ctx, &mut out);
            (processed, out)
        }));

        match run {
            Ok((Ok(()), out)) => out.finish().unwrap_or_else(|| {
                warn!("handler set no result");
                ApiResult::error(messages::HANDLER_NO_RESULT, [request.action.as_str()])
            }),
            Ok((Err(err), _)) => {
                debug!(error = %err, "handler returned an error");
                err.into_result()
            }
            Err(panic) => {
                let description = crate::panic_message(&*panic);
                warn!(error = %description, "handler panicked");
                ApiResult::error(messages::HANDLER_FAULT, [description])
            }
        }
    }
}
