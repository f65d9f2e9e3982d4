use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use stockledger_core::{MovementId, StockError, StockLevelId, StockResult, UserId};

use crate::costing;
use crate::level::{BalanceChange, StockKey, StockLevel};

/// Kind of ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Purchase,
    Sale,
    Adjustment,
    TransferIn,
    TransferOut,
    Return,
    Damaged,
    Lost,
    Found,
}

/// Sign a movement type carries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Increase,
    Decrease,
    Either,
}

impl MovementType {
    pub const ALL: [MovementType; 9] = [
        MovementType::Purchase,
        MovementType::Sale,
        MovementType::Adjustment,
        MovementType::TransferIn,
        MovementType::TransferOut,
        MovementType::Return,
        MovementType::Damaged,
        MovementType::Lost,
        MovementType::Found,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Purchase => "purchase",
            MovementType::Sale => "sale",
            MovementType::Adjustment => "adjustment",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
            MovementType::Return => "return",
            MovementType::Damaged => "damaged",
            MovementType::Lost => "lost",
            MovementType::Found => "found",
        }
    }

    /// Human readable label.
    pub fn label(&self) -> &'static str {
        match self {
            MovementType::Purchase => "Purchase",
            MovementType::Sale => "Sale",
            MovementType::Adjustment => "Adjustment",
            MovementType::TransferIn => "Transfer In",
            MovementType::TransferOut => "Transfer Out",
            MovementType::Return => "Return",
            MovementType::Damaged => "Damaged",
            MovementType::Lost => "Lost",
            MovementType::Found => "Found",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            MovementType::Purchase
            | MovementType::TransferIn
            | MovementType::Return
            | MovementType::Found => Direction::Increase,
            MovementType::Sale
            | MovementType::TransferOut
            | MovementType::Damaged
            | MovementType::Lost => Direction::Decrease,
            MovementType::Adjustment => Direction::Either,
        }
    }

    /// Whether a signed, non-zero `quantity` fits this type.
    pub fn admits(&self, quantity: i64) -> bool {
        match self.direction() {
            Direction::Increase => quantity > 0,
            Direction::Decrease => quantity < 0,
            Direction::Either => quantity != 0,
        }
    }

    pub fn is_transfer_leg(&self) -> bool {
        matches!(self, MovementType::TransferIn | MovementType::TransferOut)
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StockError::invalid(format!("unknown movement type '{s}'")))
    }
}

/// Free-form link to the business object behind a movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub reference_type: String,
    pub reference_id: String,
    pub reference_number: Option<String>,
}

impl Reference {
    pub fn new(reference_type: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
            reference_number: None,
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.reference_number = Some(number.into());
        self
    }
}

/// Batch / lot attributes carried on a movement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LotInfo {
    pub batch_number: Option<String>,
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

/// Fully computed movement payload, not yet assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub level_id: StockLevelId,
    pub key: StockKey,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<Reference>,
    pub reason: Option<String>,
    pub metadata: JsonValue,
    pub lot: LotInfo,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl MovementDraft {
    /// Draft for a balance change on `level` (the state *after* the change).
    pub fn new(
        level: &StockLevel,
        movement_type: MovementType,
        change: BalanceChange,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            level_id: level.id,
            key: level.key,
            movement_type,
            quantity: change.quantity,
            unit_cost: None,
            reference: None,
            reason: None,
            metadata: JsonValue::Null,
            lot: LotInfo::default(),
            balance_before: change.balance_before,
            balance_after: change.balance_after,
            created_by: None,
            occurred_at,
        }
    }

    /// Costs are kept at storage scale ([`costing::COST_SCALE`]).
    pub fn with_unit_cost(mut self, unit_cost: Option<Decimal>) -> Self {
        self.unit_cost = unit_cost.map(costing::round_cost);
        self
    }

    pub fn with_reference(mut self, reference: Option<Reference>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_lot(mut self, lot: LotInfo) -> Self {
        self.lot = lot;
        self
    }

    pub fn created_by(mut self, user: Option<UserId>) -> Self {
        self.created_by = user;
        self
    }

    /// Validate the payload before it becomes a ledger row.
    pub fn validate(&self) -> StockResult<()> {
        if self.quantity == 0 {
            return Err(StockError::inventory("movement quantity cannot be zero"));
        }
        if self.balance_after - self.balance_before != self.quantity {
            return Err(StockError::inventory(format!(
                "balance_after ({}) - balance_before ({}) must equal quantity ({})",
                self.balance_after, self.balance_before, self.quantity
            )));
        }
        if self.balance_before < 0 || self.balance_after < 0 {
            return Err(StockError::inventory("movement balances cannot be negative"));
        }
        if !self.movement_type.admits(self.quantity) {
            return Err(StockError::inventory(format!(
                "{} movement cannot carry quantity {}",
                self.movement_type, self.quantity
            )));
        }
        if let Some(cost) = self.unit_cost {
            costing::normalize_unit_cost(cost)?;
        }
        Ok(())
    }

    pub fn into_movement(self, id: MovementId) -> StockResult<StockMovement> {
        let total_cost = self
            .unit_cost
            .map(|cost| costing::extended_cost(cost, self.quantity))
            .transpose()?;
        Ok(StockMovement {
            id,
            level_id: self.level_id,
            key: self.key,
            movement_type: self.movement_type,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            total_cost,
            reference: self.reference,
            reason: self.reason,
            metadata: self.metadata,
            lot: self.lot,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            created_at: self.occurred_at,
            created_by: self.created_by,
        })
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub level_id: StockLevelId,
    #[serde(flatten)]
    pub key: StockKey,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: Option<Decimal>,
    pub total_cost: Option<Decimal>,
    pub reference: Option<Reference>,
    pub reason: Option<String>,
    pub metadata: JsonValue,
    pub lot: LotInfo,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
}

impl StockMovement {
    pub fn is_increase(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_decrease(&self) -> bool {
        self.quantity < 0
    }

    /// Signed quantity with an explicit `+` on increases.
    pub fn display_quantity(&self) -> String {
        if self.is_increase() {
            format!("+{}", self.quantity)
        } else {
            self.quantity.to_string()
        }
    }

    /// Absolute cost carried by the movement (zero when uncosted).
    pub fn absolute_value(&self) -> Decimal {
        self.total_cost.map(|c| c.abs()).unwrap_or(Decimal::ZERO)
    }

    pub fn references(&self, reference_type: &str, reference_id: &str) -> bool {
        self.reference
            .as_ref()
            .is_some_and(|r| r.reference_type == reference_type && r.reference_id == reference_id)
    }
}
