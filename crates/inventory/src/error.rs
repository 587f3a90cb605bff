//! Inventory error taxonomy.

use thiserror::Error;

use stockroom_core::{DomainError, ProductId};

pub type InventoryResult<T> = Result<T, InventoryError>;

/// Typed, recoverable failure of an inventory operation.
///
/// None of these is fatal to the process. Only [`InventoryError::Contention`]
/// is expected to be resolved by retrying the same call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Product, record or reservation does not exist in this tenant scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation would break `reserved <= stock` or over-reserve.
    #[error("{reason} (requested {requested}, available {available})")]
    InsufficientStock {
        reason: &'static str,
        requested: u64,
        available: u64,
    },

    /// Optimistic concurrency retries were exhausted.
    #[error("contention: concurrent updates persisted after {attempts} attempts, retry the request")]
    Contention { attempts: u32 },

    /// Called without a resolvable tenant.
    #[error("invalid tenant context")]
    InvalidTenantContext,

    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// One or more batch lines failed validation; nothing was applied.
    #[error("batch rejected: {} item(s) failed validation", .0.len())]
    BatchRejected(Vec<BatchItemFailure>),

    /// Ledger entries do not chain (an entry's before-values differ from the running totals).
    #[error("ledger chain broken at entry {entry_id}: {detail}")]
    LedgerChainBroken { entry_id: u64, detail: String },

    /// Backend failure (connection, decoding, ...).
    #[error("store error: {0}")]
    Store(String),
}

impl InventoryError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// `true` when the same call may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
}

impl From<DomainError> for InventoryError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => InventoryError::Validation(msg),
            DomainError::InvalidId(msg) => InventoryError::Validation(msg),
            DomainError::InvalidTenantContext => InventoryError::InvalidTenantContext,
        }
    }
}

/// One failing line of a rejected batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemFailure {
    /// Position of the line in the submitted batch.
    pub index: usize,
    pub product_id: ProductId,
    pub error: InventoryError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contention_is_retryable() {
        assert!(InventoryError::Contention { attempts: 5 }.is_retryable());
        assert!(!InventoryError::validation("x").is_retryable());
        assert!(!InventoryError::InvalidTenantContext.is_retryable());
    }

    #[test]
    fn insufficient_stock_message_is_human_readable() {
        let err = InventoryError::InsufficientStock {
            reason: "requested decrease exceeds available stock",
            requested: 5,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "requested decrease exceeds available stock (requested 5, available 2)"
        );
    }

    #[test]
    fn domain_tenant_error_maps_through() {
        let err: InventoryError = DomainError::InvalidTenantContext.into();
        assert_eq!(err, InventoryError::InvalidTenantContext);
    }
}
