//! Read-side query types shared by every store implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{LocationId, ProductId, VariationId};
use stockledger_inventory::{MovementType, StockLevel, StockMovement};

/// Upper bound on a single page.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Pagination parameters for movement queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of movements to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(Some(limit), None)
    }

    pub fn next_page(self) -> Self {
        Self {
            offset: self.offset.saturating_add(self.limit),
            ..self
        }
    }
}

/// Filter criteria for ledger queries. `from`/`to` are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub location_id: Option<LocationId>,
    pub variation_id: Option<VariationId>,
    pub movement_type: Option<MovementType>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl MovementFilter {
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, m: &StockMovement) -> bool {
        if self.product_id.is_some_and(|p| p != m.key.product_id) {
            return false;
        }
        if self.location_id.is_some_and(|l| l != m.key.location_id) {
            return false;
        }
        if self.variation_id.is_some() && self.variation_id != m.key.variation_id {
            return false;
        }
        if self.movement_type.is_some_and(|t| t != m.movement_type) {
            return false;
        }
        if let Some(reference_type) = &self.reference_type {
            if m.reference.as_ref().map(|r| &r.reference_type) != Some(reference_type) {
                return false;
            }
        }
        if let Some(reference_id) = &self.reference_id {
            if m.reference.as_ref().map(|r| &r.reference_id) != Some(reference_id) {
                return false;
            }
        }
        if self.from.is_some_and(|from| m.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| m.created_at > to) {
            return false;
        }
        true
    }
}

/// Paginated ledger query result, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementQueryResult {
    pub movements: Vec<StockMovement>,
    /// Total number of movements matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Filter criteria for stock level listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelFilter {
    pub product_id: Option<ProductId>,
    pub location_id: Option<LocationId>,
    /// Only rows with `quantity_on_hand > 0`.
    pub in_stock_only: bool,
    /// Only rows with `quantity_available <= reorder_point`.
    pub low_stock_only: bool,
}

impl LevelFilter {
    pub fn matches(&self, level: &StockLevel) -> bool {
        if self.product_id.is_some_and(|p| p != level.key.product_id) {
            return false;
        }
        if self.location_id.is_some_and(|l| l != level.key.location_id) {
            return false;
        }
        if self.in_stock_only && level.quantity_on_hand <= 0 {
            return false;
        }
        if self.low_stock_only && !level.is_low_stock() {
            return false;
        }
        true
    }
}
