//! The abort signal and the boundary that converts it back into an error
//!
//! Helpers deep inside a unit of work return [`Guarded<T>`] and propagate
//! failures with `?`. Only [`guarded`] and [`run_guarded`] turn the signal back
//! into a plain [`SqlError`]. Panics are never intercepted here: a panic is a
//! defect in the calling code and keeps unwinding past the boundary.

use std::fmt;
use std::future::Future;

use crate::{Result, SqlError};

/// A driver failure raised inside a guarded block.
///
/// There is deliberately no `From<SqlError>` impl: a failure becomes an
/// `Abort` only through [`raise`] or [`raise_failure`], so every tagging point
/// is visible at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abort {
    cause: SqlError,
}

impl Abort {
    /// The driver error that triggered the abort
    pub fn cause(&self) -> &SqlError {
        &self.cause
    }

    fn into_cause(self) -> SqlError {
        self.cause
    }
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aborted: {}", self.cause)
    }
}

impl std::error::Error for Abort {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Result of an operation that may raise the abort signal
pub type Guarded<T> = std::result::Result<T, Abort>;

/// Raise `cause` if there is one; `None` is a no-op.
pub fn raise_failure(cause: Option<SqlError>) -> Guarded<()> {
    match cause {
        Some(cause) => Err(Abort { cause }),
        None => Ok(()),
    }
}

/// Tag a driver result so its error travels as the abort signal
pub fn raise<T>(result: Result<T>) -> Guarded<T> {
    result.map_err(|cause| Abort { cause })
}

/// Run `f`, converting a raised abort into the returned error.
pub fn guarded<T>(f: impl FnOnce() -> Guarded<T>) -> Result<T> {
    f().map_err(Abort::into_cause)
}

/// Async counterpart of [`guarded`]
pub async fn run_guarded<T>(fut: impl Future<Output = Guarded<T>>) -> Result<T> {
    fut.await.map_err(Abort::into_cause)
}
