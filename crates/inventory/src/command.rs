//! Commands accepted by the stock mutator.
//!
//! Every command carries its tenant (inside the [`StockKey`]) and the time it
//! occurred; the engine has no ambient tenant or clock.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockledger_core::{ExpectedVersion, LocationId, ProductId, TenantId, UserId, VariationId};

use crate::level::{ReorderPolicy, StockKey};
use crate::movement::{LotInfo, MovementType, Reference};

/// Command: AdjustStock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub key: StockKey,
    pub quantity_delta: i64,
    /// Declared movement type; `adjustment` unless the caller knows better.
    pub movement_type: MovementType,
    pub reason: String,
    pub unit_cost: Option<Decimal>,
    pub metadata: JsonValue,
    pub reference: Option<Reference>,
    pub lot: LotInfo,
    pub created_by: Option<UserId>,
    pub expected_version: ExpectedVersion,
    pub occurred_at: DateTime<Utc>,
}

impl AdjustStock {
    pub fn new(
        key: StockKey,
        quantity_delta: i64,
        reason: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            quantity_delta,
            movement_type: MovementType::Adjustment,
            reason: reason.into(),
            unit_cost: None,
            metadata: JsonValue::Null,
            reference: None,
            lot: LotInfo::default(),
            created_by: None,
            expected_version: ExpectedVersion::Any,
            occurred_at,
        }
    }

    pub fn of_type(mut self, movement_type: MovementType) -> Self {
        self.movement_type = movement_type;
        self
    }

    pub fn at_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_lot(mut self, lot: LotInfo) -> Self {
        self.lot = lot;
        self
    }

    pub fn by(mut self, user: UserId) -> Self {
        self.created_by = Some(user);
        self
    }

    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = ExpectedVersion::Exact(version);
        self
    }
}

/// Command: TransferStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variation_id: Option<VariationId>,
    pub from_location: LocationId,
    pub to_location: LocationId,
    pub quantity: i64,
    pub reason: Option<String>,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl TransferStock {
    pub fn source_key(&self) -> StockKey {
        StockKey::new(
            self.tenant_id,
            self.product_id,
            self.variation_id,
            self.from_location,
        )
    }

    pub fn destination_key(&self) -> StockKey {
        self.source_key().at_location(self.to_location)
    }
}

/// Command: ReserveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub key: StockKey,
    pub quantity: i64,
    pub reference: Reference,
    pub expected_version: ExpectedVersion,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseReservedStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservedStock {
    pub key: StockKey,
    pub quantity: i64,
    pub reference: Option<Reference>,
    pub expected_version: ExpectedVersion,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CommitReservedStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReservedStock {
    pub key: StockKey,
    pub quantity: i64,
    pub reference: Reference,
    pub created_by: Option<UserId>,
    pub expected_version: ExpectedVersion,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordStockCount (cycle count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStockCount {
    pub key: StockKey,
    pub counted_quantity: i64,
    pub reason: Option<String>,
    pub created_by: Option<UserId>,
    pub expected_version: ExpectedVersion,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetReorderPolicy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReorderPolicy {
    pub key: StockKey,
    pub policy: ReorderPolicy,
    pub expected_version: ExpectedVersion,
    pub occurred_at: DateTime<Utc>,
}
