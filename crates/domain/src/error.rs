//! Shared error taxonomy used across the scheduler core.
//!
//! Variants map onto the categories external callers are expected to act on:
//! validation/conflict/not-found are synchronous request-time errors, transient
//! and terminal are the two buckets a capability failure classifies into, and
//! internal covers everything that should never happen but must still produce
//! a clean 500 instead of a panic.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("transient: {0}")]
    Transient(String),

    #[error("terminal: {0}")]
    Terminal(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Coarse category used to pick an HTTP status code and to decide whether
    /// a capability failure should be retried.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation { .. } => ErrorCategory::Validation,
            Error::Conflict(_) => ErrorCategory::Conflict,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Transient(_) => ErrorCategory::Transient,
            Error::Terminal(_) => ErrorCategory::Terminal,
            Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("json: {e}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Conflict,
    NotFound,
    Transient,
    Terminal,
    Internal,
}

pub type Result<T> = std::result::Result<T, Error>;
