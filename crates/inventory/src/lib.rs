//! Inventory stock domain.
//!
//! Business rules for stock levels, ledger entries and costing, implemented as
//! deterministic domain logic (no IO, no storage).

pub mod command;
pub mod costing;
pub mod ledger;
pub mod level;
pub mod movement;

pub use command::{
    AdjustStock, CommitReservedStock, RecordStockCount, ReleaseReservedStock, ReserveStock,
    SetReorderPolicy, TransferStock,
};
pub use ledger::{balance_at, LedgerReplay};
pub use level::{BalanceChange, ReorderPolicy, StockKey, StockLevel};
pub use movement::{Direction, LotInfo, MovementDraft, MovementType, Reference, StockMovement};
