//! Errors reported by queued operations.
use std::{any::Any, fmt::Display};

/// Failure of a queued operation.
///
/// This is the only failure the queue reports, and it reaches only the
/// `Settled` future of the entry which failed.
#[derive(thiserror::Error, Debug)]
pub enum OperationError {
    /// Operation returned an error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
    /// Operation panicked, or its task was torn down before completion.
    #[error("operation panicked: {0}")]
    Panicked(String),
}

impl OperationError {
    /// Converts a failed operation task into an `OperationError`.
    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        if !err.is_panic() {
            return Self::Panicked("operation task was cancelled".to_owned());
        }
        Self::Panicked(panic_message(err.into_panic()))
    }
}

/// Extracts the message of a panic payload, if it has one.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return (*msg).to_owned();
    }
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(_) => "<non-string panic payload>".to_owned(),
    }
}

/// Context attached to an error by `Wrap`.
pub trait Context: 'static + Display + Send + Sync {}

impl<C: 'static + Display + Send + Sync> Context for C {}

/// Adds context to the `anyhow::Error` inside an error type, keeping the
/// outer type (and hence its variant) as is.
///
/// Prefer it over `anyhow::Context` when handling `Settled` results:
/// `context()` turns an `OperationError` into an `anyhow::Error`, after which
/// a panic is indistinguishable from a returned error.
pub trait Wrap: Sized {
    /// Wraps the error with the context computed lazily by `f`.
    fn with_wrap<C: Context>(self, f: impl FnOnce() -> C) -> Self;

    /// Wraps the error with `context`.
    fn wrap<C: Context>(self, context: C) -> Self {
        self.with_wrap(move || context)
    }
}

impl<T, E: Wrap> Wrap for Result<T, E> {
    fn with_wrap<C: Context>(self, f: impl FnOnce() -> C) -> Self {
        self.map_err(|err| err.with_wrap(f))
    }
}

/// Panic messages are left untouched.
impl Wrap for OperationError {
    fn with_wrap<C: Context>(self, f: impl FnOnce() -> C) -> Self {
        if let Self::Failed(err) = self {
            return Self::Failed(err.context(f()));
        }
        self
    }
}
