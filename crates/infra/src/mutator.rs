//! Stock mutation pipeline.
//!
//! Every operation follows the same shape:
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the level(s) from the store (tenant-scoped key)
//!   ↓
//! 2. Check the caller's expected version
//!   ↓
//! 3. Compute the next state (pure, `stockledger_inventory`)
//!   ↓
//! 4. Stage level writes + movements on one unit of work
//!   ↓
//! 5. Commit atomically (compare-and-swap on every staged version)
//! ```
//!
//! The mutator never retries. A lost race surfaces as
//! `StockError::ConcurrentModification`; see [`crate::retry`].

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use stockledger_core::{StockError, StockResult};
use stockledger_inventory::{
    AdjustStock, CommitReservedStock, MovementDraft, MovementType, RecordStockCount, Reference,
    ReleaseReservedStock, ReserveStock, SetReorderPolicy, StockKey, StockLevel, StockMovement,
    TransferStock,
};

use crate::recorder::MovementRecorder;
use crate::store::{StockStore, UnitOfWork};

/// Reference type shared by both legs of a transfer.
pub const TRANSFER_REFERENCE_TYPE: &str = "transfer";

const DEFAULT_COUNT_REASON: &str = "Stock count";

/// Applies stock commands against a [`StockStore`].
#[derive(Debug)]
pub struct StockMutator<S> {
    store: S,
    recorder: MovementRecorder,
}

impl<S> StockMutator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            recorder: MovementRecorder::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

}

impl<S> StockMutator<S>
where
    S: StockStore,
{
    fn load_or_empty(&self, key: &StockKey, at: DateTime<Utc>) -> StockResult<StockLevel> {
        Ok(self
            .store
            .load_level(key)?
            .unwrap_or_else(|| StockLevel::empty(*key, at)))
    }

    /// Adjust on-hand stock by a signed delta and record one movement.
    ///
    /// The level is created on first use. Increases carrying a unit cost
    /// re-blend the weighted average cost.
    #[instrument(
        skip(self, cmd),
        fields(
            key = %cmd.key,
            delta = cmd.quantity_delta,
            movement_type = %cmd.movement_type
        ),
        err
    )]
    pub fn adjust_stock(&self, cmd: AdjustStock) -> StockResult<StockMovement> {
        if cmd.quantity_delta == 0 {
            return Err(StockError::invalid("quantity delta cannot be zero"));
        }
        if cmd.movement_type.is_transfer_leg() {
            return Err(StockError::invalid(format!(
                "{} movements are recorded by transfer_stock",
                cmd.movement_type
            )));
        }
        if !cmd.movement_type.admits(cmd.quantity_delta) {
            return Err(StockError::invalid(format!(
                "{} movement cannot carry quantity {}",
                cmd.movement_type, cmd.quantity_delta
            )));
        }

        let current = self.load_or_empty(&cmd.key, cmd.occurred_at)?;
        cmd.expected_version.check(current.version)?;

        let at = current.movement_time(cmd.occurred_at);
        let (next, change) = current.apply_delta(cmd.quantity_delta, cmd.unit_cost, at)?;
        // Uncosted decreases leave at the average; uncosted increases stay uncosted.
        let unit_cost = cmd.unit_cost.or_else(|| {
            (cmd.quantity_delta < 0 && !current.average_cost.is_zero())
                .then_some(current.average_cost)
        });

        let mut work = UnitOfWork::new();
        work.stage_level(next.clone(), current.version)?;
        let draft = MovementDraft::new(&next, cmd.movement_type, change, at)
            .with_unit_cost(unit_cost)
            .with_reference(cmd.reference)
            .with_reason(Some(cmd.reason))
            .with_metadata(cmd.metadata)
            .with_lot(cmd.lot)
            .created_by(cmd.created_by);
        let movement = self.recorder.record(&mut work, draft)?;

        self.store.commit(work)?;

        info!(
            movement_id = %movement.id,
            balance_after = movement.balance_after,
            version = next.version,
            "stock adjusted"
        );
        Ok(movement)
    }

    /// Move stock between two locations of the same product and variation.
    ///
    /// Returns `(transfer_out, transfer_in)`. Both legs are valued at the
    /// source's average cost and committed in one unit of work.
    #[instrument(
        skip(self, cmd),
        fields(
            tenant_id = %cmd.tenant_id,
            product_id = %cmd.product_id,
            from = %cmd.from_location,
            to = %cmd.to_location,
            quantity = cmd.quantity
        ),
        err
    )]
    pub fn transfer_stock(&self, cmd: TransferStock) -> StockResult<(StockMovement, StockMovement)> {
        if cmd.quantity <= 0 {
            return Err(StockError::invalid(format!(
                "transfer quantity must be positive (got {})",
                cmd.quantity
            )));
        }
        if cmd.from_location == cmd.to_location {
            return Err(StockError::invalid(
                "cannot transfer to the same location",
            ));
        }

        let source_key = cmd.source_key();
        let destination_key = cmd.destination_key();

        let Some(source) = self.store.load_level(&source_key)? else {
            return Err(StockError::insufficient(cmd.quantity, 0));
        };
        if cmd.quantity > source.quantity_available() {
            return Err(StockError::insufficient(
                cmd.quantity,
                source.quantity_available(),
            ));
        }
        let destination = self.load_or_empty(&destination_key, cmd.occurred_at)?;

        let unit_cost = source.average_cost;
        let out_at = source.movement_time(cmd.occurred_at);
        let in_at = destination.movement_time(cmd.occurred_at);
        let (source_next, out_change) = source.apply_delta(-cmd.quantity, None, out_at)?;
        let (destination_next, in_change) =
            destination.apply_delta(cmd.quantity, Some(unit_cost), in_at)?;

        let transfer_id = Uuid::now_v7().to_string();
        let out_reference = Reference::new(TRANSFER_REFERENCE_TYPE, transfer_id.clone())
            .with_number(cmd.to_location.to_string());
        let in_reference = Reference::new(TRANSFER_REFERENCE_TYPE, transfer_id.clone())
            .with_number(cmd.from_location.to_string());

        let mut work = UnitOfWork::new();
        work.stage_level(source_next.clone(), source.version)?;
        work.stage_level(destination_next.clone(), destination.version)?;

        let out_leg = self.recorder.record(
            &mut work,
            MovementDraft::new(
                &source_next,
                MovementType::TransferOut,
                out_change,
                out_at,
            )
            .with_unit_cost(Some(unit_cost))
            .with_reference(Some(out_reference))
            .with_reason(cmd.reason.clone())
            .created_by(cmd.created_by),
        )?;
        let in_leg = self.recorder.record(
            &mut work,
            MovementDraft::new(
                &destination_next,
                MovementType::TransferIn,
                in_change,
                in_at,
            )
            .with_unit_cost(Some(unit_cost))
            .with_reference(Some(in_reference))
            .with_reason(cmd.reason)
            .created_by(cmd.created_by),
        )?;

        self.store.commit(work)?;

        info!(
            transfer_id = %transfer_id,
            source_balance = out_leg.balance_after,
            destination_balance = in_leg.balance_after,
            "stock transferred"
        );
        Ok((out_leg, in_leg))
    }

    /// Hold available units for a pending reference. No ledger row is written.
    #[instrument(
        skip(self, cmd),
        fields(key = %cmd.key, quantity = cmd.quantity),
        err
    )]
    pub fn reserve_stock(&self, cmd: ReserveStock) -> StockResult<StockLevel> {
        ensure_positive(cmd.quantity)?;
        let Some(current) = self.store.load_level(&cmd.key)? else {
            return Err(StockError::insufficient(cmd.quantity, 0));
        };
        cmd.expected_version.check(current.version)?;

        let next = current.reserve(cmd.quantity, cmd.occurred_at)?;
        let mut work = UnitOfWork::new();
        work.stage_level(next.clone(), current.version)?;
        self.store.commit(work)?;

        info!(
            reference_type = %cmd.reference.reference_type,
            reference_id = %cmd.reference.reference_id,
            quantity_reserved = next.quantity_reserved,
            quantity_available = next.quantity_available(),
            "stock reserved"
        );
        Ok(next)
    }

    /// Give back reserved units. No ledger row is written.
    #[instrument(
        skip(self, cmd),
        fields(key = %cmd.key, quantity = cmd.quantity),
        err
    )]
    pub fn release_reserved_stock(&self, cmd: ReleaseReservedStock) -> StockResult<StockLevel> {
        ensure_positive(cmd.quantity)?;
        let Some(current) = self.store.load_level(&cmd.key)? else {
            return Err(StockError::inventory(format!(
                "cannot release {} reserved units, reserved: 0",
                cmd.quantity
            )));
        };
        cmd.expected_version.check(current.version)?;

        let next = current.release(cmd.quantity, cmd.occurred_at)?;
        let mut work = UnitOfWork::new();
        work.stage_level(next.clone(), current.version)?;
        self.store.commit(work)?;

        info!(
            reference_id = cmd.reference.as_ref().map(|r| r.reference_id.as_str()),
            quantity_reserved = next.quantity_reserved,
            "reservation released"
        );
        Ok(next)
    }

    /// Turn reserved units into a `sale` movement at the current average cost.
    #[instrument(
        skip(self, cmd),
        fields(
            key = %cmd.key,
            quantity = cmd.quantity,
            reference_id = %cmd.reference.reference_id
        ),
        err
    )]
    pub fn commit_reserved_stock(&self, cmd: CommitReservedStock) -> StockResult<StockMovement> {
        ensure_positive(cmd.quantity)?;
        let Some(current) = self.store.load_level(&cmd.key)? else {
            return Err(StockError::inventory(format!(
                "cannot commit {} reserved units, reserved: 0",
                cmd.quantity
            )));
        };
        cmd.expected_version.check(current.version)?;

        let at = current.movement_time(cmd.occurred_at);
        let (next, change) = current.commit_reserved(cmd.quantity, at)?;
        let mut work = UnitOfWork::new();
        work.stage_level(next.clone(), current.version)?;
        let movement = self.recorder.record(
            &mut work,
            MovementDraft::new(&next, MovementType::Sale, change, at)
                .with_unit_cost(Some(current.average_cost))
                .with_reference(Some(cmd.reference))
                .created_by(cmd.created_by),
        )?;
        self.store.commit(work)?;

        info!(
            movement_id = %movement.id,
            balance_after = movement.balance_after,
            quantity_reserved = next.quantity_reserved,
            "reserved stock committed"
        );
        Ok(movement)
    }

    /// Reconcile on-hand with a physical count.
    ///
    /// Records `found` or `lost` for the difference, or nothing when the count
    /// matches. `last_count_at` is stamped either way.
    #[instrument(
        skip(self, cmd),
        fields(key = %cmd.key, counted = cmd.counted_quantity),
        err
    )]
    pub fn record_stock_count(&self, cmd: RecordStockCount) -> StockResult<Option<StockMovement>> {
        let current = self.load_or_empty(&cmd.key, cmd.occurred_at)?;
        cmd.expected_version.check(current.version)?;

        let (next, change) = current.recount(cmd.counted_quantity, cmd.occurred_at)?;
        let mut work = UnitOfWork::new();
        work.stage_level(next.clone(), current.version)?;

        let movement = match change {
            Some(change) => {
                let movement_type = if change.quantity > 0 {
                    MovementType::Found
                } else {
                    MovementType::Lost
                };
                let reason = cmd
                    .reason
                    .unwrap_or_else(|| DEFAULT_COUNT_REASON.to_string());
                Some(self.recorder.record(
                    &mut work,
                    MovementDraft::new(&next, movement_type, change, current.movement_time(cmd.occurred_at))
                        .with_unit_cost(Some(current.average_cost))
                        .with_reason(Some(reason))
                        .created_by(cmd.created_by),
                )?)
            }
            None => None,
        };
        self.store.commit(work)?;

        info!(
            difference = movement.as_ref().map(|m| m.quantity).unwrap_or(0),
            quantity_on_hand = next.quantity_on_hand,
            "stock counted"
        );
        Ok(movement)
    }

    /// Replace the advisory reorder thresholds of a level.
    #[instrument(
        skip(self, cmd),
        fields(
            key = %cmd.key,
            reorder_point = cmd.policy.reorder_point,
            reorder_quantity = cmd.policy.reorder_quantity
        ),
        err
    )]
    pub fn set_reorder_policy(&self, cmd: SetReorderPolicy) -> StockResult<StockLevel> {
        let current = self.load_or_empty(&cmd.key, cmd.occurred_at)?;
        cmd.expected_version.check(current.version)?;

        let next = current.with_reorder_policy(cmd.policy, cmd.occurred_at)?;
        let mut work = UnitOfWork::new();
        work.stage_level(next.clone(), current.version)?;
        self.store.commit(work)?;

        info!(version = next.version, "reorder policy updated");
        Ok(next)
    }
}

fn ensure_positive(quantity: i64) -> StockResult<()> {
    if quantity <= 0 {
        return Err(StockError::invalid(format!(
            "quantity must be positive (got {quantity})"
        )));
    }
    Ok(())
}
