use thiserror::Error;

/// Failures that originate inside the resolution machinery rather than in
/// user code. They reach consumers through the promise's own error channel,
/// which is why every error type used with a `Deferred` must implement
/// `From<Error>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A deferred was resolved with its own promise.
    #[error("recursive resolution")]
    RecursiveResolution,
    /// A success or error callback panicked.
    #[error("callback panicked: {0}")]
    CallbackPanicked(String),
    /// The turn queue ran out of work before the awaited promise settled.
    #[error("turn queue went idle before the promise settled")]
    Stalled,
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
