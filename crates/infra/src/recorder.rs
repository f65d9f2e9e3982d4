//! Append-only movement recording.

use tracing::debug;

use stockledger_core::{MovementId, StockResult};
use stockledger_inventory::{MovementDraft, StockMovement};

use crate::store::UnitOfWork;

/// Turns validated drafts into ledger rows staged on a unit of work.
///
/// The recorder never reads or writes stock levels; the caller stages the
/// level whose balances the draft was computed from.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovementRecorder;

impl MovementRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Validate `draft`, assign it a time-ordered id and stage it.
    ///
    /// `created_at` is the draft's `occurred_at`.
    pub fn record(
        &self,
        work: &mut UnitOfWork,
        draft: MovementDraft,
    ) -> StockResult<StockMovement> {
        draft.validate()?;
        let movement = draft.into_movement(MovementId::new())?;
        debug!(
            movement_id = %movement.id,
            movement_type = %movement.movement_type,
            quantity = movement.quantity,
            balance_after = movement.balance_after,
            "movement staged"
        );
        work.push_movement(movement.clone());
        Ok(movement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{LocationId, ProductId, StockError, TenantId};
    use stockledger_inventory::{BalanceChange, MovementType, StockKey, StockLevel};

    fn level() -> StockLevel {
        let key = StockKey::new(TenantId::new(), ProductId::new(), None, LocationId::new());
        StockLevel::empty(key, Utc::now())
    }

    #[test]
    fn records_valid_drafts_with_fresh_ids() {
        let level = level();
        let at = Utc::now();
        let change = BalanceChange {
            quantity: 3,
            balance_before: 0,
            balance_after: 3,
        };
        let mut work = UnitOfWork::new();
        let recorder = MovementRecorder::new();

        let a = recorder
            .record(&mut work, MovementDraft::new(&level, MovementType::Purchase, change, at))
            .unwrap();
        let b = recorder
            .record(&mut work, MovementDraft::new(&level, MovementType::Purchase, change, at))
            .unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, at);
        assert_eq!(work.movements().len(), 2);
    }

    #[test]
    fn rejects_zero_quantity_and_bad_arithmetic() {
        let level = level();
        let mut work = UnitOfWork::new();
        let recorder = MovementRecorder::new();

        let zero = BalanceChange {
            quantity: 0,
            balance_before: 4,
            balance_after: 4,
        };
        let skewed = BalanceChange {
            quantity: -2,
            balance_before: 4,
            balance_after: 1,
        };
        for change in [zero, skewed] {
            let draft = MovementDraft::new(&level, MovementType::Adjustment, change, Utc::now());
            assert!(matches!(
                recorder.record(&mut work, draft),
                Err(StockError::InventoryError(_))
            ));
        }
        assert!(work.movements().is_empty());
    }

    #[test]
    fn rejects_type_sign_mismatch() {
        let level = level();
        let change = BalanceChange {
            quantity: 2,
            balance_before: 0,
            balance_after: 2,
        };
        let mut work = UnitOfWork::new();
        let draft = MovementDraft::new(&level, MovementType::Sale, change, Utc::now());
        assert!(MovementRecorder::new().record(&mut work, draft).is_err());
    }
}
