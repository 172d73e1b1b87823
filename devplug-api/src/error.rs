//! Defines the error type shared by every layer of the core runtime.

use std::fmt;
use tokio::sync::{mpsc, oneshot};

/// Enumerates all the errors that can be reported by the core runtime.
/// Device handlers should map their own failures into one of these
/// values via [`Error::HandlerError`] rather than inventing new
/// variants; add a new variant only when no existing one is general
/// enough to describe the failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No configuration file could be located in the search path.
    ConfigNotFound(String),

    /// A configuration file was found but failed to parse or
    /// validate.
    ConfigInvalid(String),

    /// The configuration declares a `version` this runtime doesn't
    /// understand.
    ConfigVersionUnsupported(i64),

    /// A handler with this name is already registered.
    DuplicateHandler(String),

    /// A device with this id is already registered.
    DuplicateID(String),

    /// A device's alias collides with another device's alias.
    DuplicateAlias(String),

    /// A device refers to a handler name that was never registered.
    UnknownHandler(String),

    /// Wraps a failure returned by user-supplied handler code.
    HandlerError(String),

    /// The requested operation isn't supported by the target (e.g. a
    /// `Write` against a read-only device).
    UnsupportedCommand(String),

    /// A device, transaction, or other named resource couldn't be
    /// found (including one that has expired).
    NotFound,

    /// A malformed RPC request.
    InvalidArgument(String),

    /// A handler call didn't complete before its deadline.
    Timeout,

    /// Everything else.
    Internal(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigNotFound(v) => {
                write!(f, "configuration not found: {}", v)
            }
            Error::ConfigInvalid(v) => write!(f, "invalid configuration: {}", v),
            Error::ConfigVersionUnsupported(v) => {
                write!(f, "unsupported configuration version: {}", v)
            }
            Error::DuplicateHandler(v) => {
                write!(f, "handler '{}' is already registered", v)
            }
            Error::DuplicateID(v) => {
                write!(f, "device id '{}' is already registered", v)
            }
            Error::DuplicateAlias(v) => {
                write!(f, "alias '{}' is already in use", v)
            }
            Error::UnknownHandler(v) => {
                write!(f, "no handler named '{}' is registered", v)
            }
            Error::HandlerError(v) => write!(f, "handler error: {}", v),
            Error::UnsupportedCommand(v) => write!(f, "unsupported: {}", v),
            Error::NotFound => write!(f, "not found"),
            Error::InvalidArgument(v) => write!(f, "invalid argument: {}", v),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Internal(v) => write!(f, "internal error: {}", v),
        }
    }
}

// Letting any code that sends requests over an `mpsc` channel and
// awaits the reply on a `oneshot` translate channel failures into a
// core `Error` with a plain `?`.

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(_error: mpsc::error::SendError<T>) -> Self {
        Error::Internal(String::from("request channel is closed"))
    }
}

impl From<oneshot::error::RecvError> for Error {
    fn from(_error: oneshot::error::RecvError) -> Self {
        Error::Internal(String::from("reply was dropped before it arrived"))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_error: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Aggregates the errors produced while validating or executing a
/// batch of independent items (setup actions, device construction,
/// config validation). Each entry pairs a label (device id, action
/// name, file name, ...) with the error it produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiError(pub Vec<(String, Error)>);

impl MultiError {
    pub fn new() -> Self {
        MultiError(Vec::new())
    }

    pub fn push(&mut self, label: impl Into<String>, err: Error) {
        self.0.push((label.into(), err));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `Err(self)` if any errors were accumulated, `Ok(())`
    /// otherwise.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s):", self.0.len())?;
        for (label, err) in &self.0 {
            write!(f, "\n  {}: {}", label, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
