use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use stockledger_core::{
    MovementId, StockError, StockLevelId, StockResult, StorageError, TenantId,
};
use stockledger_inventory::{StockKey, StockLevel, StockMovement};

use super::query::{LevelFilter, MovementFilter, MovementQueryResult, Pagination};
use super::r#trait::{LedgerStore, LevelStore, StockStore, UnitOfWork};

#[derive(Debug, Default)]
struct Inner {
    levels: HashMap<StockKey, StockLevel>,
    /// Append-only, in commit order.
    movements: Vec<StockMovement>,
    movement_ids: HashSet<MovementId>,
}

/// In-memory stock store.
///
/// Intended for tests/dev. A single write lock serializes commits, so every
/// unit of work is applied atomically.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    inner: RwLock<Inner>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StorageError> {
        self.inner
            .read()
            .map_err(|_| StorageError::other("lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StorageError> {
        self.inner
            .write()
            .map_err(|_| StorageError::other("lock poisoned"))
    }

    /// Number of ledger rows across all tenants.
    pub fn movement_count(&self) -> Result<usize, StorageError> {
        Ok(self.read()?.movements.len())
    }
}

/// Matching movements, newest first (ties: later commits first).
fn newest_first<'a>(
    inner: &'a Inner,
    tenant_id: TenantId,
    filter: &MovementFilter,
) -> Vec<&'a StockMovement> {
    let mut matching: Vec<(usize, &StockMovement)> = inner
        .movements
        .iter()
        .enumerate()
        .filter(|(_, m)| m.key.tenant_id == tenant_id && filter.matches(m))
        .collect();
    matching.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
    matching.into_iter().map(|(_, m)| m).collect()
}

impl LevelStore for InMemoryStockStore {
    fn load_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StorageError> {
        Ok(self.read()?.levels.get(key).cloned())
    }

    fn list_levels(
        &self,
        tenant_id: TenantId,
        filter: &LevelFilter,
    ) -> Result<Vec<StockLevel>, StorageError> {
        let inner = self.read()?;
        let mut levels: Vec<StockLevel> = inner
            .levels
            .values()
            .filter(|l| l.key.tenant_id == tenant_id && filter.matches(l))
            .cloned()
            .collect();
        levels.sort_by(|a, b| {
            a.quantity_available()
                .cmp(&b.quantity_available())
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(levels)
    }
}

impl LedgerStore for InMemoryStockStore {
    fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StorageError> {
        let inner = self.read()?;
        let matching = newest_first(&inner, tenant_id, filter);

        let total = matching.len() as u64;
        let movements = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();

        Ok(MovementQueryResult {
            movements,
            total,
            pagination,
            has_more: total > u64::from(pagination.offset) + u64::from(pagination.limit),
        })
    }

    fn scan_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, StorageError> {
        let inner = self.read()?;
        Ok(newest_first(&inner, tenant_id, filter)
            .into_iter()
            .cloned()
            .collect())
    }

    fn level_movements(
        &self,
        tenant_id: TenantId,
        level_id: StockLevelId,
    ) -> Result<Vec<StockMovement>, StorageError> {
        let inner = self.read()?;
        Ok(inner
            .movements
            .iter()
            .filter(|m| m.key.tenant_id == tenant_id && m.level_id == level_id)
            .cloned()
            .collect())
    }
}

impl StockStore for InMemoryStockStore {
    fn commit(&self, work: UnitOfWork) -> StockResult<()> {
        if work.is_empty() {
            return Ok(());
        }
        work.validate()?;

        let mut inner = self.write()?;

        // Check every write before applying any of them.
        for write in work.level_writes() {
            let current = inner.levels.get(&write.level.key);
            let current_version = current.map(|l| l.version).unwrap_or(0);
            if current_version != write.expected_version {
                return Err(StockError::conflict(format!(
                    "stock level {} is at version {current_version}, expected {}",
                    write.level.key, write.expected_version
                )));
            }
            if let Some(current) = current {
                if current.id != write.level.id {
                    return Err(StorageError::constraint(format!(
                        "stock level {} already exists with a different id",
                        write.level.key
                    ))
                    .into());
                }
            }
        }
        for m in work.movements() {
            if inner.movement_ids.contains(&m.id) {
                return Err(StorageError::constraint(format!(
                    "movement {} already recorded",
                    m.id
                ))
                .into());
            }
        }

        let (levels, movements) = work.into_parts();
        for write in levels {
            inner.levels.insert(write.level.key, write.level);
        }
        for m in movements {
            inner.movement_ids.insert(m.id);
            inner.movements.push(m);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use stockledger_core::{LocationId, ProductId};
    use stockledger_inventory::{MovementDraft, MovementType};

    fn key(tenant_id: TenantId) -> StockKey {
        StockKey::new(tenant_id, ProductId::new(), None, LocationId::new())
    }

    fn receive(level: &StockLevel, qty: i64) -> UnitOfWork {
        let at = level.updated_at + Duration::seconds(1);
        let (next, change) = level.apply_delta(qty, None, at).unwrap();
        let movement = MovementDraft::new(&next, MovementType::Adjustment, change, at)
            .into_movement(MovementId::new())
            .unwrap();
        let mut work = UnitOfWork::new();
        work.stage_level(next, level.version).unwrap();
        work.push_movement(movement);
        work
    }

    #[test]
    fn commit_applies_levels_and_movements_together() {
        let store = InMemoryStockStore::new();
        let key = key(TenantId::new());
        let level = StockLevel::empty(key, Utc::now());

        store.commit(receive(&level, 5)).unwrap();

        let stored = store.load_level(&key).unwrap().unwrap();
        assert_eq!(stored.quantity_on_hand, 5);
        assert_eq!(stored.version, 1);
        let ledger = store.level_movements(key.tenant_id, stored.id).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].balance_after, 5);
    }

    #[test]
    fn stale_version_fails_without_side_effects() {
        let store = InMemoryStockStore::new();
        let key = key(TenantId::new());
        let level = StockLevel::empty(key, Utc::now());

        let first = receive(&level, 5);
        let second = receive(&level, 7);
        store.commit(first).unwrap();

        let err = store.commit(second).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.load_level(&key).unwrap().unwrap().quantity_on_hand, 5);
        assert_eq!(store.movement_count().unwrap(), 1);
    }

    #[test]
    fn duplicate_movement_ids_are_rejected() {
        let store = InMemoryStockStore::new();
        let key = key(TenantId::new());
        let level = StockLevel::empty(key, Utc::now());
        let work = receive(&level, 5);
        let replay_id = work.movements()[0].id;
        store.commit(work).unwrap();

        let level = store.load_level(&key).unwrap().unwrap();
        let (levels, mut movements) = receive(&level, 1).into_parts();
        movements[0].id = replay_id;
        let mut again = UnitOfWork::new();
        again
            .stage_level(levels[0].level.clone(), levels[0].expected_version)
            .unwrap();
        again.push_movement(movements.remove(0));

        let err = store.commit(again).unwrap_err();
        assert!(matches!(
            err,
            StockError::Storage(ref e) if e.kind == stockledger_core::StorageErrorKind::Constraint
        ));
        assert_eq!(store.load_level(&key).unwrap().unwrap().quantity_on_hand, 5);
    }

    #[test]
    fn queries_are_tenant_scoped_and_newest_first() {
        let store = InMemoryStockStore::new();
        let tenant_id = TenantId::new();
        let key = key(tenant_id);
        let mut level = StockLevel::empty(key, Utc::now());
        for qty in [1, 2, 3] {
            store.commit(receive(&level, qty)).unwrap();
            level = store.load_level(&key).unwrap().unwrap();
        }
        store
            .commit(receive(&StockLevel::empty(self::key(TenantId::new()), Utc::now()), 9))
            .unwrap();

        let page = store
            .query_movements(tenant_id, &MovementFilter::default(), Pagination::first(2))
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(page.has_more);
        let quantities: Vec<_> = page.movements.iter().map(|m| m.quantity).collect();
        assert_eq!(quantities, vec![3, 2]);

        let rest = store
            .query_movements(
                tenant_id,
                &MovementFilter::default(),
                Pagination::first(2).next_page(),
            )
            .unwrap();
        assert_eq!(rest.movements.len(), 1);
        assert!(!rest.has_more);
    }
}
