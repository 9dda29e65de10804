//! Domain error model.

use thiserror::Error;

use crate::id::{HoldId, Sku};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business/domain failures only. Infrastructure concerns (storage,
/// transport) belong to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or semantically impossible quantity (negative, zero where positive
    /// is required, more than the bucket holds).
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// The requested quantity exceeds what can be promised.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// No stock record exists for the SKU.
    #[error("stock record not found for sku {0}")]
    RecordNotFound(Sku),

    /// Release of a hold that is not active on the record.
    #[error("hold {0} not found")]
    HoldNotFound(HoldId),

    /// Post-mutation consistency check failed. This is a defect, never a business
    /// outcome, and must not be repaired silently.
    #[error(
        "stock level invariant violated: {rule} (on_hand={quantity_on_hand}, allocated={quantity_allocated})"
    )]
    InvariantViolation {
        rule: String,
        quantity_on_hand: i64,
        quantity_allocated: i64,
    },

    /// A value failed validation (e.g. empty SKU).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A conflict occurred (stale version, record already exists).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn insufficient(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn invariant(rule: impl Into<String>, quantity_on_hand: i64, quantity_allocated: i64) -> Self {
        Self::InvariantViolation {
            rule: rule.into(),
            quantity_on_hand,
            quantity_allocated,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Whether the error signals data corruption / a programming defect.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}
