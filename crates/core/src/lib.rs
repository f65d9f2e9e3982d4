//! `stockledger-core`: identifiers, versioning and the error taxonomy shared by
//! every stock ledger crate.
//!
//! This crate has no infrastructure concerns.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{StockError, StockResult, StorageError, StorageErrorKind};
pub use id::{LocationId, MovementId, ProductId, StockLevelId, TenantId, UserId, VariationId};
