//! Stock engine error model.

use thiserror::Error;

/// Result type used across the stock ledger.
pub type StockResult<T> = Result<T, StockError>;

/// Error returned by every stock engine operation.
///
/// Business-rule failures (`InsufficientStock`, `InvalidOperation`,
/// `InventoryError`) are deterministic and must not be retried.
/// `ConcurrentModification` means another writer committed first; the caller
/// may re-read and retry. `Storage` is propagated unchanged from the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// A decrease or reservation exceeds what the level can give.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// The optimistic version guard failed.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Malformed request (zero quantity, identical transfer endpoints, ...).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Generic invariant violation (e.g. releasing more than is reserved).
    #[error("inventory error: {0}")]
    InventoryError(String),

    /// Underlying persistence failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StockError {
    pub fn insufficient(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn inventory(msg: impl Into<String>) -> Self {
        Self::InventoryError(msg.into())
    }

    /// Only a lost optimistic race is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

/// Coarse classification of persistence failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// Lock wait, statement or pool acquisition timed out.
    Timeout,
    /// Connection could not be established or was lost.
    Connection,
    /// A storage constraint rejected the write (check, foreign key, unique).
    Constraint,
    Other,
}

impl core::fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            StorageErrorKind::Timeout => "timeout",
            StorageErrorKind::Connection => "connection",
            StorageErrorKind::Constraint => "constraint",
            StorageErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Persistence failure reported by a store implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("storage error ({kind}): {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Connection, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Constraint, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Other, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(StockError::conflict("stale").is_retryable());
        assert!(!StockError::insufficient(5, 2).is_retryable());
        assert!(!StockError::invalid("zero").is_retryable());
        assert!(!StockError::inventory("over-release").is_retryable());
        assert!(!StockError::from(StorageError::timeout("lock wait")).is_retryable());
    }

    #[test]
    fn storage_errors_keep_their_message() {
        let err: StockError = StorageError::constraint("non_negative_on_hand").into();
        assert_eq!(
            err.to_string(),
            "storage error (constraint): non_negative_on_hand"
        );
    }
}
