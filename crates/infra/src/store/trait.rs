use std::sync::Arc;

use stockledger_core::{StockError, StockLevelId, StockResult, StorageError, TenantId};
use stockledger_inventory::{StockKey, StockLevel, StockMovement};

use super::query::{LevelFilter, MovementFilter, MovementQueryResult, Pagination};

/// A staged compare-and-swap of one stock level.
///
/// `expected_version` is the version that was read (0 when the row did not
/// exist yet); the store applies `level` only if the stored version still
/// equals it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelWrite {
    pub level: StockLevel,
    pub expected_version: u64,
}

/// Everything one stock operation writes, committed atomically by
/// [`StockStore::commit`].
///
/// Level writes are kept in ascending [`StockKey`] order so every store locks
/// rows in the same order. Movements can only be staged by the
/// [`MovementRecorder`](crate::recorder::MovementRecorder).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOfWork {
    levels: Vec<LevelWrite>,
    movements: Vec<StockMovement>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the next state of a level read at `expected_version`.
    pub fn stage_level(&mut self, level: StockLevel, expected_version: u64) -> StockResult<()> {
        if level.version != expected_version + 1 {
            return Err(StockError::inventory(format!(
                "staged level {} must be at version {}, found {}",
                level.key,
                expected_version + 1,
                level.version
            )));
        }
        if self.levels.iter().any(|w| w.level.key == level.key) {
            return Err(StockError::inventory(format!(
                "level {} staged twice in one unit of work",
                level.key
            )));
        }
        level.check_invariants()?;

        let at = self
            .levels
            .partition_point(|w| w.level.key < level.key);
        self.levels.insert(
            at,
            LevelWrite {
                level,
                expected_version,
            },
        );
        Ok(())
    }

    pub(crate) fn push_movement(&mut self, movement: StockMovement) {
        self.movements.push(movement);
    }

    /// Level writes in lock order.
    pub fn level_writes(&self) -> &[LevelWrite] {
        &self.levels
    }

    /// Movements in recording order.
    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty() && self.movements.is_empty()
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.levels.first().map(|w| w.level.key.tenant_id)
    }

    /// Structural checks every store runs before writing anything: one tenant
    /// per unit of work, and every movement accompanies a write of its level
    /// whose on-hand equals the movement's `balance_after`.
    pub fn validate(&self) -> StockResult<()> {
        if let Some(tenant_id) = self.tenant_id() {
            if self.levels.iter().any(|w| w.level.key.tenant_id != tenant_id)
                || self.movements.iter().any(|m| m.key.tenant_id != tenant_id)
            {
                return Err(StockError::inventory("unit of work spans multiple tenants"));
            }
        }
        for m in &self.movements {
            let level = self
                .levels
                .iter()
                .find(|w| w.level.id == m.level_id)
                .map(|w| &w.level)
                .ok_or_else(|| {
                    StockError::inventory(format!(
                        "movement {} has no staged level write",
                        m.id
                    ))
                })?;
            if level.key != m.key {
                return Err(StockError::inventory(format!(
                    "movement {} key does not match its level",
                    m.id
                )));
            }
            let last_for_level = self
                .movements
                .iter()
                .filter(|other| other.level_id == m.level_id)
                .last()
                .is_some_and(|last| last.id == m.id);
            if last_for_level && level.quantity_on_hand != m.balance_after {
                return Err(StockError::inventory(format!(
                    "movement {} leaves balance {} but level holds {}",
                    m.id, m.balance_after, level.quantity_on_hand
                )));
            }
        }
        Ok(())
    }

    pub fn into_parts(self) -> (Vec<LevelWrite>, Vec<StockMovement>) {
        (self.levels, self.movements)
    }
}

/// Durable keyed store of stock level aggregates.
pub trait LevelStore: Send + Sync {
    /// Current committed state of a level, `None` if it was never written.
    fn load_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StorageError>;

    /// Levels of one tenant matching `filter`, lowest availability first.
    fn list_levels(
        &self,
        tenant_id: TenantId,
        filter: &LevelFilter,
    ) -> Result<Vec<StockLevel>, StorageError>;
}

/// Append-only ledger of stock movements.
pub trait LedgerStore: Send + Sync {
    /// Movements of one tenant matching `filter`, newest first.
    fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StorageError>;

    /// Every movement of one tenant matching `filter`, newest first, read as
    /// one snapshot. Appends racing with the read are either wholly included
    /// or wholly absent.
    fn scan_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, StorageError>;

    /// Every movement of one level in recording order (oldest first).
    fn level_movements(
        &self,
        tenant_id: TenantId,
        level_id: StockLevelId,
    ) -> Result<Vec<StockMovement>, StorageError>;
}

/// Transactional stock store: levels and ledger committed together.
///
/// `commit` must:
/// - apply every level write only if its stored version equals
///   `expected_version`, failing the whole unit with
///   `StockError::ConcurrentModification` otherwise
/// - take row locks in the order of [`UnitOfWork::level_writes`]
/// - insert every movement exactly once
/// - make all of it visible atomically, or none of it
pub trait StockStore: LevelStore + LedgerStore {
    fn commit(&self, work: UnitOfWork) -> StockResult<()>;
}

impl<S> LevelStore for Arc<S>
where
    S: LevelStore + ?Sized,
{
    fn load_level(&self, key: &StockKey) -> Result<Option<StockLevel>, StorageError> {
        (**self).load_level(key)
    }

    fn list_levels(
        &self,
        tenant_id: TenantId,
        filter: &LevelFilter,
    ) -> Result<Vec<StockLevel>, StorageError> {
        (**self).list_levels(tenant_id, filter)
    }
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StorageError> {
        (**self).query_movements(tenant_id, filter, pagination)
    }

    fn scan_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, StorageError> {
        (**self).scan_movements(tenant_id, filter)
    }

    fn level_movements(
        &self,
        tenant_id: TenantId,
        level_id: StockLevelId,
    ) -> Result<Vec<StockMovement>, StorageError> {
        (**self).level_movements(tenant_id, level_id)
    }
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn commit(&self, work: UnitOfWork) -> StockResult<()> {
        (**self).commit(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{LocationId, ProductId};

    fn key(tenant_id: TenantId) -> StockKey {
        StockKey::new(tenant_id, ProductId::new(), None, LocationId::new())
    }

    #[test]
    fn level_writes_are_kept_in_key_order() {
        let tenant_id = TenantId::new();
        let mut work = UnitOfWork::new();
        for _ in 0..5 {
            let level = StockLevel::empty(key(tenant_id), Utc::now());
            let (next, _) = level.apply_delta(1, None, Utc::now()).unwrap();
            work.stage_level(next, 0).unwrap();
        }
        let keys: Vec<_> = work.level_writes().iter().map(|w| w.level.key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn staging_requires_a_version_bump() {
        let level = StockLevel::empty(key(TenantId::new()), Utc::now());
        let mut work = UnitOfWork::new();
        assert!(matches!(
            work.stage_level(level, 0),
            Err(StockError::InventoryError(_))
        ));
    }

    #[test]
    fn staging_rejects_mixed_tenants_on_validate() {
        let mut work = UnitOfWork::new();
        for tenant_id in [TenantId::new(), TenantId::new()] {
            let level = StockLevel::empty(key(tenant_id), Utc::now());
            let (next, _) = level.apply_delta(1, None, Utc::now()).unwrap();
            work.stage_level(next, 0).unwrap();
        }
        assert!(matches!(work.validate(), Err(StockError::InventoryError(_))));
    }
}
