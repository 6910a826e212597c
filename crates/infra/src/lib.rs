//! Coordination layer: configuration, background jobs, principal locks, request dispatch.

pub mod config;
pub mod dispatcher;
pub mod jobs;
pub mod locks;


/// Text of a panic payload caught with `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
