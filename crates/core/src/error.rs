//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business/domain failures. Infrastructure
/// concerns (storage, transport) belong elsewhere.
///
/// The variants are deliberately distinct because callers react to them
/// differently at the boundary:
/// - `Validation` → malformed input, fail fast, never retried
/// - `InvalidState` → operation not allowed in the current lifecycle state
/// - `Forbidden` → authorization rule violated (e.g. separation of duties)
/// - `Conflict` → stale version / duplicate creation, recoverable by reload
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. out-of-range input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation is not valid in the aggregate's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / duplicate creation).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    ///
    /// Deliberately carries no detail: the outer boundary must not let callers
    /// distinguish which rule was violated. The violation is logged for audit
    /// at the layer that produced it.
    #[error("forbidden")]
    Forbidden,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
