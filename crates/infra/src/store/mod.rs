//! Stock persistence boundary.
//!
//! Levels and ledger rows are read through [`LevelStore`] / [`LedgerStore`] and
//! written together through [`StockStore::commit`], one [`UnitOfWork`] at a
//! time. Tenant ids are part of every key and every query.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use query::{LevelFilter, MovementFilter, MovementQueryResult, Pagination, MAX_PAGE_SIZE};
pub use r#trait::{LedgerStore, LevelStore, LevelWrite, StockStore, UnitOfWork};
