//! Error types for the TinySQL engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The engine's error taxonomy (spec §7). Every public entry point returns
/// this type; panics that escape internal invariants are caught at the top
/// of `Database::execute` and converted into `Error::Internal`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error at {position}: {message}")]
    Parse { message: String, position: usize },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl Error {
    pub fn parse(message: impl Into<String>, position: usize) -> Self {
        Error::Parse { message: message.into(), position }
    }

    pub fn catalog(message: impl Into<String>) -> Self {
        Error::Catalog(message.into())
    }

    pub fn ty(message: impl Into<String>) -> Self {
        Error::Type(message.into())
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Error::Constraint(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict(message.into())
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Error::Resource(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// A stable, SQLSTATE-ish tag for the CLI surface of spec §6.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Parse { .. } => "42601",
            Error::Catalog(_) => "42P01",
            Error::Type(_) => "42804",
            Error::Constraint(_) => "23000",
            Error::Conflict(_) => "40001",
            Error::Io(_) => "58030",
            Error::Resource(_) => "57014",
            Error::Internal(_) => "XX000",
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Internal(format!("serialization error: {err}"))
    }
}

/// Caller-supplied cooperative cancellation (spec §5): every top-level
/// `Database` call takes one, and long-running operators (joins,
/// aggregations, window partitions, recursive CTE rounds) poll it between
/// rows. Timeouts are layered on top by a caller that cancels the token
/// after its own deadline; the engine itself has no notion of wall-clock
/// time.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// A token that can never be canceled, for callers that don't need it.
    pub fn none() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Error::Resource` if this token has been canceled.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::resource("operation canceled"))
        } else {
            Ok(())
        }
    }
}
