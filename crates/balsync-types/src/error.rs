//! Error types for the balance synchronisation engine.
//!
//! All errors use the `BS_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Remote fetch / authentication errors
//! - 2xx: Session errors
//! - 3xx: Stream / event errors
//! - 4xx: Cache errors
//! - 9xx: General / internal errors

use thiserror::Error;

/// Central error enum for all BalSync operations.
#[derive(Debug, Error)]
pub enum BalsyncError {
    // =================================================================
    // Fetch / Auth Errors (1xx)
    // =================================================================
    /// Credentials or signature rejected. Not retryable without an operator.
    #[error("BS_ERR_100: Authentication rejected: {reason}")]
    Auth { reason: String },

    /// Network failure, 5xx-equivalent, or other retryable remote error.
    #[error("BS_ERR_101: Transient fetch failure: {reason}")]
    TransientFetch { reason: String },

    /// A remote call did not complete within its bound.
    #[error("BS_ERR_102: {operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    // =================================================================
    // Session Errors (2xx)
    // =================================================================
    /// The session expired, was invalidated, or its stream closed.
    #[error("BS_ERR_200: Session lost: {reason}")]
    SessionLost { reason: String },

    // =================================================================
    // Stream / Event Errors (3xx)
    // =================================================================
    /// A stream frame could not be decoded into an event.
    #[error("BS_ERR_300: Malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// A balance failed validation (negative, bad precision, empty symbol).
    #[error("BS_ERR_301: Invalid balance for {asset}: {reason}")]
    InvalidBalance { asset: String, reason: String },

    /// A snapshot cannot be a consistent full read of the account.
    #[error("BS_ERR_302: Invalid snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    // =================================================================
    // Cache Errors (4xx)
    // =================================================================
    /// An operation was attempted in a cache state that does not allow it.
    #[error("BS_ERR_400: Cannot {operation} while cache is {state}")]
    InvalidCacheState { operation: String, state: String },

    /// The cache has been closed; no further mutations are accepted.
    #[error("BS_ERR_401: Cache closed")]
    CacheClosed,

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("BS_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("BS_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid values, missing fields, etc.).
    #[error("BS_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl BalsyncError {
    /// Fatal errors stop the supervisor and need operator action.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Retryable errors are retried with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientFetch { .. }
                | Self::Timeout { .. }
                | Self::InvalidSnapshot { .. }
                | Self::InvalidBalance { .. }
                | Self::Serialization(_)
        )
    }

    /// Session loss sends the supervisor into recovery.
    #[must_use]
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::SessionLost { .. })
    }

    /// Shorthand for a transient fetch failure.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientFetch {
            reason: reason.into(),
        }
    }

    /// Shorthand for an authentication failure.
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, BalsyncError>;

impl From<serde_json::Error> for BalsyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
