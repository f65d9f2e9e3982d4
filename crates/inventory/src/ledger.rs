//! Ledger replay: rebuild balances from movements.
//!
//! Movements must be supplied in the order they were recorded for one level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::MovementId;

use crate::movement::StockMovement;

/// Result of replaying one level's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerReplay {
    /// Σ movement.quantity.
    pub balance: i64,
    pub movement_count: usize,
    /// Movements whose snapshot does not chain onto the previous balance, or
    /// whose `balance_after - balance_before` differs from `quantity`.
    pub broken_links: Vec<MovementId>,
}

impl LedgerReplay {
    pub fn from_movements<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> Self {
        let mut replay = LedgerReplay::default();
        for m in movements {
            let chained = m.balance_before == replay.balance;
            let arithmetic = m.balance_after - m.balance_before == m.quantity;
            if !chained || !arithmetic {
                replay.broken_links.push(m.id);
            }
            replay.balance += m.quantity;
            replay.movement_count += 1;
        }
        replay
    }

    pub fn is_consistent_with(&self, on_hand: i64) -> bool {
        self.broken_links.is_empty() && self.balance == on_hand
    }
}

/// On-hand balance as of `at`: the `balance_after` of the last movement
/// recorded at or before `at`, or zero if there is none.
pub fn balance_at<'a>(
    movements: impl IntoIterator<Item = &'a StockMovement>,
    at: DateTime<Utc>,
) -> i64 {
    movements
        .into_iter()
        .filter(|m| m.created_at <= at)
        .last()
        .map(|m| m.balance_after)
        .unwrap_or(0)
}
