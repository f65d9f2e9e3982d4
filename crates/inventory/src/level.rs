use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{
    AggregateRoot, LocationId, ProductId, StockError, StockLevelId, StockResult, TenantId,
    VariationId,
};

use crate::costing;

/// Identity of a stock level: one row per tenant, product, optional variation
/// and location.
///
/// The derived ordering is the lock order used when a unit of work touches more
/// than one level.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variation_id: Option<VariationId>,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(
        tenant_id: TenantId,
        product_id: ProductId,
        variation_id: Option<VariationId>,
        location_id: LocationId,
    ) -> Self {
        Self {
            tenant_id,
            product_id,
            variation_id,
            location_id,
        }
    }

    /// Same product and variation, different location.
    pub fn at_location(&self, location_id: LocationId) -> Self {
        Self {
            location_id,
            ..*self
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.variation_id {
            Some(variation) => write!(
                f,
                "{}/{}:{}@{}",
                self.tenant_id, self.product_id, variation, self.location_id
            ),
            None => write!(f, "{}/{}@{}", self.tenant_id, self.product_id, self.location_id),
        }
    }
}

/// Advisory replenishment thresholds. Never enforced as hard limits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReorderPolicy {
    pub reorder_point: i64,
    pub reorder_quantity: i64,
    pub max_stock_level: Option<i64>,
}

impl ReorderPolicy {
    pub fn validate(&self) -> StockResult<()> {
        if self.reorder_point < 0 || self.reorder_quantity < 0 {
            return Err(StockError::invalid("reorder thresholds cannot be negative"));
        }
        if let Some(max) = self.max_stock_level {
            if max < self.reorder_point {
                return Err(StockError::invalid(
                    "max stock level cannot be below the reorder point",
                ));
            }
        }
        Ok(())
    }
}

/// Balance snapshot produced by a transition that changes `quantity_on_hand`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub quantity: i64,
    pub balance_before: i64,
    pub balance_after: i64,
}

/// Aggregate root: the current stock summary of one [`StockKey`].
///
/// Transition methods never mutate `self`; they return the next state with
/// `version` bumped by one so the store can compare-and-swap against the
/// version that was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub id: StockLevelId,
    #[serde(flatten)]
    pub key: StockKey,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
    pub reorder_point: i64,
    pub reorder_quantity: i64,
    pub max_stock_level: Option<i64>,
    pub average_cost: Decimal,
    pub version: u64,
    pub last_movement_at: Option<DateTime<Utc>>,
    pub last_count_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRoot for StockLevel {
    type Id = StockLevelId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl StockLevel {
    /// A level that has never been written: zero quantities, version 0.
    pub fn empty(key: StockKey, at: DateTime<Utc>) -> Self {
        Self {
            id: StockLevelId::new(),
            key,
            quantity_on_hand: 0,
            quantity_reserved: 0,
            reorder_point: 0,
            reorder_quantity: 0,
            max_stock_level: None,
            average_cost: Decimal::ZERO,
            version: 0,
            last_movement_at: None,
            last_count_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    pub fn quantity_available(&self) -> i64 {
        self.quantity_on_hand - self.quantity_reserved
    }

    /// `quantity_on_hand * average_cost`.
    pub fn total_cost(&self) -> StockResult<Decimal> {
        costing::extended_cost(self.average_cost, self.quantity_on_hand)
    }

    pub fn reorder_policy(&self) -> ReorderPolicy {
        ReorderPolicy {
            reorder_point: self.reorder_point,
            reorder_quantity: self.reorder_quantity,
            max_stock_level: self.max_stock_level,
        }
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity_available() <= self.reorder_point
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.quantity_on_hand <= 0
    }

    pub fn is_over_stock(&self) -> bool {
        matches!(self.max_stock_level, Some(max) if self.quantity_on_hand > max)
    }

    pub fn can_reserve(&self, quantity: i64) -> bool {
        quantity > 0 && self.quantity_available() >= quantity
    }

    /// Check the quantity and cost invariants of this state.
    pub fn check_invariants(&self) -> StockResult<()> {
        if self.quantity_on_hand < 0 {
            return Err(StockError::inventory(format!(
                "on-hand quantity cannot be negative ({})",
                self.quantity_on_hand
            )));
        }
        if self.quantity_reserved < 0 || self.quantity_reserved > self.quantity_on_hand {
            return Err(StockError::inventory(format!(
                "reserved quantity {} outside 0..={}",
                self.quantity_reserved, self.quantity_on_hand
            )));
        }
        if self.average_cost.is_sign_negative() && !self.average_cost.is_zero() {
            return Err(StockError::inventory("average cost cannot be negative"));
        }
        Ok(())
    }

    /// Timestamp for the next ledger row: `at`, but never earlier than the
    /// last movement already booked on this level.
    pub fn movement_time(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_movement_at {
            Some(last) if last > at => last,
            _ => at,
        }
    }

    fn next(&self, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = at.max(self.updated_at);
        next
    }

    /// Move `delta` units in or out.
    ///
    /// Increases carrying `incoming_unit_cost` re-blend the average cost.
    /// Decreases may not take on-hand below zero nor below what is reserved.
    /// `last_movement_at` never moves backwards; see [`Self::movement_time`].
    pub fn apply_delta(
        &self,
        delta: i64,
        incoming_unit_cost: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> StockResult<(StockLevel, BalanceChange)> {
        if delta == 0 {
            return Err(StockError::invalid("quantity delta cannot be zero"));
        }
        let incoming_unit_cost = incoming_unit_cost
            .map(costing::normalize_unit_cost)
            .transpose()?;
        let at = self.movement_time(at);

        let balance_before = self.quantity_on_hand;
        let balance_after = balance_before
            .checked_add(delta)
            .ok_or_else(|| StockError::invalid("quantity delta overflows on-hand"))?;

        if balance_after < 0 {
            return Err(StockError::insufficient(-delta, balance_before));
        }
        if balance_after < self.quantity_reserved {
            return Err(StockError::insufficient(-delta, self.quantity_available()));
        }

        let mut next = self.next(at);
        if delta > 0 {
            if let Some(cost) = incoming_unit_cost {
                next.average_cost =
                    costing::weighted_average_cost(balance_before, self.average_cost, delta, cost)?;
            }
        }
        next.quantity_on_hand = balance_after;
        next.last_movement_at = Some(at);

        Ok((
            next,
            BalanceChange {
                quantity: delta,
                balance_before,
                balance_after,
            },
        ))
    }

    /// Hold `quantity` available units for a pending reference.
    pub fn reserve(&self, quantity: i64, at: DateTime<Utc>) -> StockResult<StockLevel> {
        ensure_positive(quantity)?;
        if !self.can_reserve(quantity) {
            return Err(StockError::insufficient(quantity, self.quantity_available()));
        }
        let mut next = self.next(at);
        next.quantity_reserved += quantity;
        Ok(next)
    }

    /// Give back `quantity` reserved units.
    pub fn release(&self, quantity: i64, at: DateTime<Utc>) -> StockResult<StockLevel> {
        ensure_positive(quantity)?;
        if quantity > self.quantity_reserved {
            return Err(StockError::inventory(format!(
                "cannot release {quantity} reserved units, reserved: {}",
                self.quantity_reserved
            )));
        }
        let mut next = self.next(at);
        next.quantity_reserved -= quantity;
        Ok(next)
    }

    /// Turn `quantity` reserved units into a permanent decrease.
    pub fn commit_reserved(
        &self,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> StockResult<(StockLevel, BalanceChange)> {
        ensure_positive(quantity)?;
        if quantity > self.quantity_reserved {
            return Err(StockError::inventory(format!(
                "cannot commit {quantity} reserved units, reserved: {}",
                self.quantity_reserved
            )));
        }

        let at = self.movement_time(at);
        let balance_before = self.quantity_on_hand;
        let mut next = self.next(at);
        next.quantity_reserved -= quantity;
        next.quantity_on_hand -= quantity;
        next.last_movement_at = Some(at);

        Ok((
            next,
            BalanceChange {
                quantity: -quantity,
                balance_before,
                balance_after: balance_before - quantity,
            },
        ))
    }

    /// Reconcile on-hand with a physical count.
    ///
    /// Returns the balance change when the count differs from the books.
    pub fn recount(
        &self,
        counted: i64,
        at: DateTime<Utc>,
    ) -> StockResult<(StockLevel, Option<BalanceChange>)> {
        if counted < 0 {
            return Err(StockError::invalid("counted quantity cannot be negative"));
        }
        if counted < self.quantity_reserved {
            return Err(StockError::inventory(format!(
                "counted {counted} units but {} are reserved",
                self.quantity_reserved
            )));
        }

        let delta = counted - self.quantity_on_hand;
        let (mut next, change) = if delta == 0 {
            (self.next(at), None)
        } else {
            let (next, change) = self.apply_delta(delta, None, at)?;
            (next, Some(change))
        };
        next.last_count_at = Some(at);
        Ok((next, change))
    }

    pub fn with_reorder_policy(
        &self,
        policy: ReorderPolicy,
        at: DateTime<Utc>,
    ) -> StockResult<StockLevel> {
        policy.validate()?;
        let mut next = self.next(at);
        next.reorder_point = policy.reorder_point;
        next.reorder_quantity = policy.reorder_quantity;
        next.max_stock_level = policy.max_stock_level;
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
