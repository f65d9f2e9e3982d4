//! Infrastructure layer: stock mutation pipeline, reporting, storage, config.
//!
//! - [`mutator`] turns commands into staged level writes plus ledger rows
//! - [`store`] persists a [`store::UnitOfWork`] atomically (in-memory or Postgres)
//! - [`reporting`] answers read-only questions over levels and the ledger
//! - [`retry`] re-runs whole operations that lost an optimistic race

pub mod config;
pub mod mutator;
pub mod recorder;
pub mod reporting;
pub mod retry;
pub mod store;


pub use config::{ConfigError, StockEngineConfig};
pub use mutator::StockMutator;
pub use recorder::MovementRecorder;
pub use reporting::{
    AllProductsTracked, InventoryAnalytics, LedgerCheck, MovementTypeSummary, ProductCatalog,
    StockReports, UntrackedProducts, Valuation,
};
pub use retry::{retry_on_conflict, RetryPolicy};
pub use store::{
    InMemoryStockStore, LedgerStore, LevelFilter, LevelStore, MovementFilter,
    MovementQueryResult, Pagination, PostgresStockStore, StockStore, UnitOfWork,
};
