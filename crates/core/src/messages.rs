//! Message keys used by the coordination layer.
//!
//! Keys are opaque to this workspace: rendering them into localized text is the job
//! of the message catalog that sits in front of the transport.

/// The requested action has no registered handler. Params: `[action]`.
pub const UNKNOWN_ACTION: &str = "msg-unknown-action";

/// A handler failed. Params: `[failure description]`.
pub const HANDLER_FAULT: &str = "msg-handler-fault";

/// A handler returned without setting a result. Params: `[action]`.
pub const HANDLER_NO_RESULT: &str = "msg-handler-no-result";

/// The principal lock could not be acquired in time. Params: `[principal]`.
pub const LOCK_TIMEOUT: &str = "msg-lock-timeout";

/// The job scheduler rejected a submission. Params: `[cause]`.
pub const SCHEDULING_ERROR: &str = "msg-scheduling-error";

/// The action exists but is not implemented. Params: `[action]`.
pub const NOT_IMPLEMENTED: &str = "msg-not-implemented";

/// Backup job admitted and in progress.
pub const BACKUP_BUSY: &str = "msg-backup-busy";

/// Backup job rejected: another backup is running.
pub const BACKUP_ALREADY_BUSY: &str = "msg-backup-already-busy";

/// A conflicting job is executing. Params: `[job type]`.
pub const JOB_BUSY: &str = "msg-job-busy";

/// Home directory cleanup scheduled.
pub const HOME_CLEAN_STARTED: &str = "msg-home-clean-started";

/// Ticket cancellation follow-up scheduled. Params: `[ticket]`.
pub const TICKET_CANCEL_SCHEDULED: &str = "msg-ticket-cancel-scheduled";

/// User record not found. Params: `[principal]`.
pub const USER_NOT_FOUND: &str = "msg-user-not-found";

/// Request parameter missing or malformed. Params: `[detail]`.
pub const INVALID_PARAMETER: &str = "msg-invalid-parameter";
