//! Read-only stock reports over a level store and its ledger.

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use stockledger_core::{
    LocationId, ProductId, StockError, StockLevelId, StockResult, TenantId, VariationId,
};
use stockledger_inventory::costing::round_cost;
use stockledger_inventory::{
    ledger, LedgerReplay, MovementType, StockKey, StockLevel, StockMovement,
};

use crate::config::StockEngineConfig;
use crate::store::{
    LedgerStore, LevelFilter, LevelStore, MovementFilter, MovementQueryResult, Pagination,
    MAX_PAGE_SIZE,
};

/// Answers whether a product participates in stock tracking.
pub trait ProductCatalog: Send + Sync {
    fn is_actively_tracked(&self, tenant_id: TenantId, product_id: ProductId) -> bool;
}

/// Catalog that tracks every product.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllProductsTracked;

impl ProductCatalog for AllProductsTracked {
    fn is_actively_tracked(&self, _tenant_id: TenantId, _product_id: ProductId) -> bool {
        true
    }
}

/// Catalog that tracks everything except an explicit opt-out set.
#[derive(Debug, Default)]
pub struct UntrackedProducts {
    untracked: RwLock<HashSet<(TenantId, ProductId)>>,
}

impl UntrackedProducts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn untrack(&self, tenant_id: TenantId, product_id: ProductId) {
        self.write().insert((tenant_id, product_id));
    }

    pub fn track(&self, tenant_id: TenantId, product_id: ProductId) {
        self.write().remove(&(tenant_id, product_id));
    }

    // A panic elsewhere cannot leave a half-applied insert or remove behind,
    // so a poisoned set is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashSet<(TenantId, ProductId)>> {
        self.untracked.read().unwrap_or_else(|poisoned| {
            warn!("untracked product set was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashSet<(TenantId, ProductId)>> {
        self.untracked.write().unwrap_or_else(|poisoned| {
            warn!("untracked product set was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

impl ProductCatalog for UntrackedProducts {
    fn is_actively_tracked(&self, tenant_id: TenantId, product_id: ProductId) -> bool {
        !self.read().contains(&(tenant_id, product_id))
    }
}

/// Inventory value over levels with stock on hand.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Valuation {
    /// Σ on_hand × average_cost.
    pub total_value: Decimal,
    pub total_quantity: i64,
    /// Stock levels contributing to the totals (one per product, variation
    /// and location with stock on hand).
    pub product_count: usize,
    /// `total_value / total_quantity`, zero when nothing is on hand.
    pub average_value_per_unit: Decimal,
}

/// Per-type movement totals. Quantities and values are absolute.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovementTypeSummary {
    pub count: u64,
    pub total_quantity: i64,
    pub total_value: Decimal,
}

/// Outcome of replaying one level's ledger against its stored on-hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCheck {
    pub key: StockKey,
    /// `None` when the level has never been written.
    pub level_id: Option<StockLevelId>,
    pub quantity_on_hand: i64,
    pub replay: LedgerReplay,
    pub consistent: bool,
}

/// Dashboard roll-up over a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAnalytics {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_movements: u64,
    pub movement_summary: BTreeMap<MovementType, MovementTypeSummary>,
    pub low_stock_count: usize,
    pub out_of_stock_count: usize,
    pub valuation: Valuation,
}

/// Query facade. Never writes.
#[derive(Debug)]
pub struct StockReports<S, C = AllProductsTracked> {
    store: S,
    catalog: C,
    default_history_limit: u32,
}

impl<S> StockReports<S, AllProductsTracked> {
    pub fn new(store: S) -> Self {
        Self::with_catalog(store, AllProductsTracked)
    }
}

impl<S, C> StockReports<S, C> {
    pub fn with_catalog(store: S, catalog: C) -> Self {
        Self {
            store,
            catalog,
            default_history_limit: Pagination::default().limit,
        }
    }

    /// Apply the reporting settings of `config` (default history limit).
    pub fn configured(self, config: &StockEngineConfig) -> Self {
        self.with_history_limit(config.default_history_limit)
    }

    /// Limit used by [`movement_history`](Self::movement_history) when the
    /// caller passes none.
    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.default_history_limit = limit.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, C> StockReports<S, C>
where
    S: LevelStore + LedgerStore,
    C: ProductCatalog,
{
    /// Levels at or below their reorder point, for tracked products only,
    /// lowest availability first.
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub fn low_stock_alerts(&self, tenant_id: TenantId) -> StockResult<Vec<StockLevel>> {
        let filter = LevelFilter {
            low_stock_only: true,
            ..Default::default()
        };
        let mut levels: Vec<StockLevel> = self
            .store
            .list_levels(tenant_id, &filter)?
            .into_iter()
            .filter(|l| self.catalog.is_actively_tracked(tenant_id, l.key.product_id))
            .collect();
        levels.sort_by_key(|l| l.quantity_available());
        Ok(levels)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub fn valuation(
        &self,
        tenant_id: TenantId,
        location_id: Option<LocationId>,
    ) -> StockResult<Valuation> {
        let filter = LevelFilter {
            location_id,
            in_stock_only: true,
            ..Default::default()
        };
        let levels = self.store.list_levels(tenant_id, &filter)?;
        value_levels(&levels)
    }

    /// Newest-first movements of one product, optionally narrowed to a
    /// location and variation.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, product_id = %product_id), err)]
    pub fn movement_history(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        location_id: Option<LocationId>,
        variation_id: Option<VariationId>,
        limit: Option<u32>,
    ) -> StockResult<Vec<StockMovement>> {
        let filter = MovementFilter {
            location_id,
            variation_id,
            ..MovementFilter::for_product(product_id)
        };
        let pagination = Pagination::first(limit.unwrap_or(self.default_history_limit));
        Ok(self
            .store
            .query_movements(tenant_id, &filter, pagination)?
            .movements)
    }

    /// Totals per movement type over an inclusive window.
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub fn movement_summary(
        &self,
        tenant_id: TenantId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> StockResult<BTreeMap<MovementType, MovementTypeSummary>> {
        let filter = MovementFilter {
            from,
            to,
            ..Default::default()
        };
        let movements = self.store.scan_movements(tenant_id, &filter)?;
        summarize(&movements)
    }

    pub fn search_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> StockResult<MovementQueryResult> {
        Ok(self.store.query_movements(tenant_id, filter, pagination)?)
    }

    /// Every movement linked to one business reference, newest first.
    pub fn movements_by_reference(
        &self,
        tenant_id: TenantId,
        reference_type: &str,
        reference_id: &str,
    ) -> StockResult<Vec<StockMovement>> {
        let filter = MovementFilter {
            reference_type: Some(reference_type.to_string()),
            reference_id: Some(reference_id.to_string()),
            ..Default::default()
        };
        Ok(self.store.scan_movements(tenant_id, &filter)?)
    }

    pub fn out_of_stock(&self, tenant_id: TenantId) -> StockResult<Vec<StockLevel>> {
        Ok(self
            .store
            .list_levels(tenant_id, &LevelFilter::default())?
            .into_iter()
            .filter(StockLevel::is_out_of_stock)
            .collect())
    }

    pub fn over_stock(&self, tenant_id: TenantId) -> StockResult<Vec<StockLevel>> {
        Ok(self
            .store
            .list_levels(tenant_id, &LevelFilter::default())?
            .into_iter()
            .filter(StockLevel::is_over_stock)
            .collect())
    }

    /// On-hand of `key` as of `at`, from the ledger.
    pub fn balance_at(&self, key: &StockKey, at: DateTime<Utc>) -> StockResult<i64> {
        let Some(level) = self.store.load_level(key)? else {
            return Ok(0);
        };
        let movements = self.store.level_movements(key.tenant_id, level.id)?;
        Ok(ledger::balance_at(&movements, at))
    }

    /// Replay the ledger of `key` and compare it with the stored on-hand.
    #[instrument(skip(self), fields(key = %key), err)]
    pub fn verify_ledger(&self, key: &StockKey) -> StockResult<LedgerCheck> {
        let Some(level) = self.store.load_level(key)? else {
            return Ok(LedgerCheck {
                key: *key,
                level_id: None,
                quantity_on_hand: 0,
                replay: LedgerReplay::default(),
                consistent: true,
            });
        };
        let movements = self.store.level_movements(key.tenant_id, level.id)?;
        let replay = LedgerReplay::from_movements(&movements);
        let consistent = replay.is_consistent_with(level.quantity_on_hand);
        if !consistent {
            tracing::warn!(
                level_id = %level.id,
                replayed = replay.balance,
                on_hand = level.quantity_on_hand,
                broken_links = replay.broken_links.len(),
                "ledger does not reconcile with stock level"
            );
        }
        Ok(LedgerCheck {
            key: *key,
            level_id: Some(level.id),
            quantity_on_hand: level.quantity_on_hand,
            replay,
            consistent,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub fn analytics(
        &self,
        tenant_id: TenantId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StockResult<InventoryAnalytics> {
        let movement_summary = self.movement_summary(tenant_id, Some(from), Some(to))?;
        let total_movements = movement_summary.values().map(|s| s.count).sum();
        let levels = self.store.list_levels(tenant_id, &LevelFilter::default())?;

        let low_stock_count = levels
            .iter()
            .filter(|l| l.is_low_stock())
            .filter(|l| self.catalog.is_actively_tracked(tenant_id, l.key.product_id))
            .count();
        let out_of_stock_count = levels.iter().filter(|l| l.is_out_of_stock()).count();
        let in_stock: Vec<StockLevel> = levels
            .into_iter()
            .filter(|l| l.quantity_on_hand > 0)
            .collect();

        Ok(InventoryAnalytics {
            from,
            to,
            total_movements,
            movement_summary,
            low_stock_count,
            out_of_stock_count,
            valuation: value_levels(&in_stock)?,
        })
    }
}

fn overflow(what: &str) -> StockError {
    StockError::invalid(format!("{what} overflows the supported range"))
}

fn value_levels(levels: &[StockLevel]) -> StockResult<Valuation> {
    let mut total_value = Decimal::ZERO;
    let mut total_quantity = 0i64;
    let mut level_count = 0;
    for level in levels.iter().filter(|l| l.quantity_on_hand > 0) {
        total_value = total_value
            .checked_add(level.total_cost()?)
            .ok_or_else(|| overflow("inventory value"))?;
        total_quantity = total_quantity
            .checked_add(level.quantity_on_hand)
            .ok_or_else(|| overflow("inventory quantity"))?;
        level_count += 1;
    }
    let average_value_per_unit = if total_quantity == 0 {
        Decimal::ZERO
    } else {
        round_cost(total_value / Decimal::from(total_quantity))
    };
    Ok(Valuation {
        total_value,
        total_quantity,
        product_count: level_count,
        average_value_per_unit,
    })
}

fn summarize(
    movements: &[StockMovement],
) -> StockResult<BTreeMap<MovementType, MovementTypeSummary>> {
    let mut summary: BTreeMap<MovementType, MovementTypeSummary> = BTreeMap::new();
    for m in movements {
        let entry = summary.entry(m.movement_type).or_default();
        entry.count += 1;
        entry.total_quantity = entry
            .total_quantity
            .checked_add(m.quantity.abs())
            .ok_or_else(|| overflow("movement quantity total"))?;
        entry.total_value = entry
            .total_value
            .checked_add(m.absolute_value())
            .ok_or_else(|| overflow("movement value total"))?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use stockledger_core::ExpectedVersion;
    use stockledger_inventory::{AdjustStock, ReorderPolicy, SetReorderPolicy};

    use crate::mutator::StockMutator;
    use crate::store::InMemoryStockStore;

    struct Fixture {
        store: Arc<InMemoryStockStore>,
        mutator: StockMutator<Arc<InMemoryStockStore>>,
        tenant_id: TenantId,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryStockStore::new());
            Self {
                mutator: StockMutator::new(store.clone()),
                store,
                tenant_id: TenantId::new(),
            }
        }

        fn key(&self) -> StockKey {
            StockKey::new(self.tenant_id, ProductId::new(), None, LocationId::new())
        }

        fn receive(&self, key: StockKey, qty: i64, cost: Decimal) {
            self.mutator
                .adjust_stock(
                    AdjustStock::new(key, qty, "receive", Utc::now())
                        .of_type(MovementType::Purchase)
                        .at_unit_cost(cost),
                )
                .unwrap();
        }

        fn reorder_at(&self, key: StockKey, reorder_point: i64, max: Option<i64>) {
            self.mutator
                .set_reorder_policy(SetReorderPolicy {
                    key,
                    policy: ReorderPolicy {
                        reorder_point,
                        reorder_quantity: 10,
                        max_stock_level: max,
                    },
                    expected_version: ExpectedVersion::Any,
                    occurred_at: Utc::now(),
                })
                .unwrap();
        }
    }

    #[test]
    fn valuation_over_stocked_levels() {
        let fx = Fixture::new();
        fx.receive(fx.key(), 10, dec!(2.00));
        fx.receive(fx.key(), 5, dec!(3.00));
        let empty = fx.key();
        fx.reorder_at(empty, 1, None);

        let valuation = StockReports::new(fx.store.clone())
            .valuation(fx.tenant_id, None)
            .unwrap();
        assert_eq!(valuation.total_value, dec!(35.00));
        assert_eq!(valuation.total_quantity, 15);
        assert_eq!(valuation.product_count, 2);
        assert_eq!(valuation.average_value_per_unit, dec!(2.3333));
    }

    #[test]
    fn valuation_counts_each_stocked_level() {
        let fx = Fixture::new();
        let shelf = fx.key();
        let backroom = shelf.at_location(LocationId::new());
        fx.receive(shelf, 4, dec!(1.00));
        fx.receive(backroom, 6, dec!(1.00));

        let valuation = StockReports::new(fx.store.clone())
            .valuation(fx.tenant_id, None)
            .unwrap();
        assert_eq!(valuation.product_count, 2);
        assert_eq!(valuation.total_quantity, 10);
    }

    #[test]
    fn configured_history_limit_applies_by_default() {
        let fx = Fixture::new();
        let key = fx.key();
        for _ in 0..4 {
            fx.receive(key, 1, dec!(1));
        }
        let config = StockEngineConfig {
            default_history_limit: 3,
            ..Default::default()
        };

        let reports = StockReports::new(fx.store.clone()).configured(&config);
        let history = reports
            .movement_history(fx.tenant_id, key.product_id, None, None, None)
            .unwrap();
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn untracked_set_survives_a_poisoned_lock() {
        let catalog = Arc::new(UntrackedProducts::new());
        let (tenant_id, product_id) = (TenantId::new(), ProductId::new());
        let poisoner = catalog.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.untracked.write().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(catalog.untracked.is_poisoned());

        catalog.untrack(tenant_id, product_id);
        assert!(!catalog.is_actively_tracked(tenant_id, product_id));
        catalog.track(tenant_id, product_id);
        assert!(catalog.is_actively_tracked(tenant_id, product_id));
    }

    #[test]
    fn low_stock_alerts_skip_untracked_products() {
        let fx = Fixture::new();
        let tracked = fx.key();
        let untracked = fx.key();
        let healthy = fx.key();
        for (key, qty) in [(tracked, 2), (untracked, 1), (healthy, 50)] {
            fx.receive(key, qty, dec!(1));
            fx.reorder_at(key, 5, None);
        }

        let catalog = UntrackedProducts::new();
        catalog.untrack(fx.tenant_id, untracked.product_id);
        let reports = StockReports::with_catalog(fx.store.clone(), catalog);

        let alerts = reports.low_stock_alerts(fx.tenant_id).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].key, tracked);

        let all = StockReports::new(fx.store.clone())
            .low_stock_alerts(fx.tenant_id)
            .unwrap();
        let available: Vec<_> = all.iter().map(|l| l.quantity_available()).collect();
        assert_eq!(available, vec![1, 2]);
    }

    #[test]
    fn out_and_over_stock_listings() {
        let fx = Fixture::new();
        let empty = fx.key();
        let full = fx.key();
        fx.receive(empty, 3, dec!(1));
        fx.mutator
            .adjust_stock(AdjustStock::new(empty, -3, "write off", Utc::now()))
            .unwrap();
        fx.receive(full, 30, dec!(1));
        fx.reorder_at(full, 5, Some(20));

        let reports = StockReports::new(fx.store.clone());
        let out: Vec<_> = reports
            .out_of_stock(fx.tenant_id)
            .unwrap()
            .into_iter()
            .map(|l| l.key)
            .collect();
        let over: Vec<_> = reports
            .over_stock(fx.tenant_id)
            .unwrap()
            .into_iter()
            .map(|l| l.key)
            .collect();
        assert_eq!(out, vec![empty]);
        assert_eq!(over, vec![full]);
    }

    #[test]
    fn history_defaults_and_summary_uses_absolute_values() {
        let fx = Fixture::new();
        let key = fx.key();
        fx.receive(key, 10, dec!(2.00));
        for _ in 0..3 {
            fx.mutator
                .adjust_stock(
                    AdjustStock::new(key, -2, "sold", Utc::now()).of_type(MovementType::Sale),
                )
                .unwrap();
        }

        let reports = StockReports::new(fx.store.clone()).with_history_limit(2);
        let history = reports
            .movement_history(fx.tenant_id, key.product_id, None, None, None)
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|m| m.movement_type == MovementType::Sale));

        let summary = reports.movement_summary(fx.tenant_id, None, None).unwrap();
        let sales = &summary[&MovementType::Sale];
        assert_eq!(sales.count, 3);
        assert_eq!(sales.total_quantity, 6);
        assert_eq!(sales.total_value, dec!(12.00));
        assert_eq!(summary[&MovementType::Purchase].total_value, dec!(20.00));
    }

    #[test]
    fn balance_at_reads_the_ledger_back_in_time() {
        let fx = Fixture::new();
        let key = fx.key();
        let t0 = Utc::now();
        for (i, delta) in [5i64, 3, -4].into_iter().enumerate() {
            fx.mutator
                .adjust_stock(AdjustStock::new(
                    key,
                    delta,
                    "step",
                    t0 + Duration::hours(i as i64),
                ))
                .unwrap();
        }

        let reports = StockReports::new(fx.store.clone());
        assert_eq!(reports.balance_at(&key, t0 - Duration::minutes(1)).unwrap(), 0);
        assert_eq!(reports.balance_at(&key, t0).unwrap(), 5);
        assert_eq!(reports.balance_at(&key, t0 + Duration::minutes(90)).unwrap(), 8);
        assert_eq!(reports.balance_at(&key, t0 + Duration::hours(3)).unwrap(), 4);
        assert_eq!(reports.balance_at(&fx.key(), t0).unwrap(), 0);
    }

    #[test]
    fn verify_ledger_reconciles_committed_state() {
        let fx = Fixture::new();
        let key = fx.key();
        fx.receive(key, 8, dec!(1));
        fx.mutator
            .adjust_stock(AdjustStock::new(key, -3, "shrink", Utc::now()))
            .unwrap();

        let reports = StockReports::new(fx.store.clone());
        let check = reports.verify_ledger(&key).unwrap();
        assert!(check.consistent);
        assert_eq!(check.replay.balance, 5);
        assert_eq!(check.replay.movement_count, 2);

        let missing = reports.verify_ledger(&fx.key()).unwrap();
        assert!(missing.consistent);
        assert!(missing.level_id.is_none());
    }

    #[test]
    fn analytics_combines_summary_and_valuation() {
        let fx = Fixture::new();
        let from = Utc::now() - Duration::hours(1);
        let key = fx.key();
        fx.receive(key, 4, dec!(2.50));
        fx.reorder_at(key, 10, None);
        let to = Utc::now() + Duration::hours(1);

        let analytics = StockReports::new(fx.store.clone())
            .analytics(fx.tenant_id, from, to)
            .unwrap();
        assert_eq!(analytics.total_movements, 1);
        assert_eq!(analytics.low_stock_count, 1);
        assert_eq!(analytics.out_of_stock_count, 0);
        assert_eq!(analytics.valuation.total_value, dec!(10.00));
    }

    #[test]
    fn reference_lookup_collects_matching_rows() {
        let fx = Fixture::new();
        let key = fx.key();
        fx.mutator
            .adjust_stock(
                AdjustStock::new(key, 6, "po", Utc::now())
                    .of_type(MovementType::Purchase)
                    .with_reference(stockledger_inventory::Reference::new("purchase_order", "PO-7")),
            )
            .unwrap();
        fx.receive(key, 1, dec!(1));

        let rows = StockReports::new(fx.store.clone())
            .movements_by_reference(fx.tenant_id, "purchase_order", "PO-7")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 6);
    }
}
