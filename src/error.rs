//! Typed error classes for the reporting core.
//!
//! Callers — the offline buffer above all — dispatch on the error class to
//! decide between retry, drop, and treat-as-applied:
//! - `Validation`: rejected before any side effect, never retried
//! - `Conflict`: duplicate idempotency token, already-applied success
//! - `Transient`: storage unavailable, safe to retry
//! - `Configuration`: bad parameters, rejected without mutating state
//! - `NotFound`: unknown report or fingerprint

/// Error type shared by every core operation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Payload rejected before any persistence side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Duplicate idempotency token — the submission was already applied.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage failure; the operation is safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Invalid parameters; stored state was not touched.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    /// Whether a caller may safely retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// SQLite failures reach callers as retryable `Transient` errors. Call
/// sites that care about constraint violations (reference collisions,
/// duplicate idempotency tokens) match on `rusqlite::Error` before the
/// conversion applies.
impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
