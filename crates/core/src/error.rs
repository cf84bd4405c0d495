//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are deterministic business-rule failures surfaced directly to the
/// caller with a stable code. None of them are transient, so nothing here is
/// retried automatically; only [`DomainError::Conflict`] (a lost
/// optimistic-concurrency race) is worth a caller-side retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A referenced branch/order/return/product/account does not exist.
    #[error("not found")]
    NotFound,

    /// The target exists but is not in the state the operation requires
    /// (e.g. ordering from a non-ACTIVE branch).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A status transition was attempted out of a terminal status.
    #[error("already finalized: {0}")]
    AlreadyFinalized(String),

    /// A record was referenced across a branch boundary
    /// (e.g. a return against another branch's order).
    #[error("ownership mismatch: {0}")]
    OwnershipMismatch(String),

    /// A return line names a product absent from the originating order.
    #[error("not in original order: {0}")]
    NotInOriginalOrder(String),

    /// A value failed validation (non-positive quantity, malformed status...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Optimistic concurrency race lost (stale aggregate version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller identity is not allowed to perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl DomainError {
    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn already_finalized(msg: impl Into<String>) -> Self {
        Self::AlreadyFinalized(msg.into())
    }

    pub fn ownership_mismatch(msg: impl Into<String>) -> Self {
        Self::OwnershipMismatch(msg.into())
    }

    pub fn not_in_original_order(msg: impl Into<String>) -> Self {
        Self::NotInOriginalOrder(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::AlreadyFinalized(_) => "already_finalized",
            Self::OwnershipMismatch(_) => "ownership_mismatch",
            Self::NotInOriginalOrder(_) => "not_in_original_order",
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::Forbidden(_) => "forbidden",
        }
    }
}
