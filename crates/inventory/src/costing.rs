//! Weighted-average costing.
//!
//! Pure functions, no state. The stock level calls these whenever a
//! positive, cost-bearing quantity lands on it.

use rust_decimal::{Decimal, RoundingStrategy};

use stockledger_core::{StockError, StockResult};

/// Decimal places kept on costs, matching the `NUMERIC(19, 4)` columns.
pub const COST_SCALE: u32 = 4;

/// Round to [`COST_SCALE`], midpoint away from zero.
pub fn round_cost(cost: Decimal) -> Decimal {
    cost.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

fn overflow(what: &str) -> StockError {
    StockError::invalid(format!("{what} overflows the supported cost range"))
}

/// Validate a caller-supplied unit cost and round it to [`COST_SCALE`].
pub fn normalize_unit_cost(cost: Decimal) -> StockResult<Decimal> {
    if cost.is_sign_negative() && !cost.is_zero() {
        return Err(StockError::invalid("unit cost cannot be negative"));
    }
    Ok(round_cost(cost))
}

/// Blend the current average cost with an incoming receipt.
///
/// ```text
/// (on_hand * average + incoming_qty * incoming_cost) / (on_hand + incoming_qty)
/// ```
///
/// A non-positive `incoming_qty` leaves `average` untouched. A zero
/// denominator yields zero. Arithmetic overflow is `InvalidOperation`.
pub fn weighted_average_cost(
    on_hand: i64,
    average: Decimal,
    incoming_qty: i64,
    incoming_cost: Decimal,
) -> StockResult<Decimal> {
    if incoming_qty <= 0 {
        return Ok(average);
    }

    let held = Decimal::from(on_hand.max(0));
    let incoming = Decimal::from(incoming_qty);
    let total_qty = held
        .checked_add(incoming)
        .ok_or_else(|| overflow("on-hand quantity"))?;
    if total_qty.is_zero() {
        return Ok(Decimal::ZERO);
    }

    let held_value = held
        .checked_mul(average)
        .ok_or_else(|| overflow("held stock value"))?;
    let incoming_value = incoming
        .checked_mul(incoming_cost)
        .ok_or_else(|| overflow("incoming stock value"))?;
    let blended = held_value
        .checked_add(incoming_value)
        .and_then(|value| value.checked_div(total_qty))
        .ok_or_else(|| overflow("blended stock value"))?;
    Ok(round_cost(blended))
}

/// Extended cost of a movement: `unit_cost * |quantity|`.
pub fn extended_cost(unit_cost: Decimal, quantity: i64) -> StockResult<Decimal> {
    unit_cost
        .checked_mul(Decimal::from(quantity.unsigned_abs()))
        .ok_or_else(|| overflow("movement cost"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn blends_existing_and_incoming_cost() {
        let cost = weighted_average_cost(10, dec!(2.00), 10, dec!(4.00)).unwrap();
        assert_eq!(cost, dec!(3.00));
    }

    #[test]
    fn empty_level_takes_incoming_cost() {
        assert_eq!(weighted_average_cost(0, dec!(0), 7, dec!(1.25)), Ok(dec!(1.25)));
    }

    #[test]
    fn non_positive_incoming_keeps_average() {
        assert_eq!(weighted_average_cost(10, dec!(2.50), 0, dec!(9)), Ok(dec!(2.50)));
        assert_eq!(weighted_average_cost(10, dec!(2.50), -3, dec!(9)), Ok(dec!(2.50)));
    }

    #[test]
    fn rounds_to_cost_scale() {
        // (1 * 1 + 2 * 0) / 3 = 0.3333...
        assert_eq!(weighted_average_cost(1, dec!(1), 2, dec!(0)), Ok(dec!(0.3333)));
    }

    #[test]
    fn extended_cost_ignores_sign() {
        assert_eq!(extended_cost(dec!(2.50), -4), Ok(dec!(10.00)));
        assert_eq!(extended_cost(dec!(2.50), 4), Ok(dec!(10.00)));
    }

    #[test]
    fn oversized_values_are_rejected_instead_of_panicking() {
        assert!(matches!(
            extended_cost(Decimal::MAX, 2),
            Err(StockError::InvalidOperation(_))
        ));
        assert!(matches!(
            weighted_average_cost(0, Decimal::ZERO, 2, Decimal::MAX),
            Err(StockError::InvalidOperation(_))
        ));
        let huge = Decimal::from(10i64.pow(18));
        assert!(matches!(
            weighted_average_cost(1_000_000_000_000, huge, 1, Decimal::ONE),
            Err(StockError::InvalidOperation(_))
        ));
    }

    #[test]
    fn unit_costs_are_rounded_to_storage_scale() {
        assert_eq!(normalize_unit_cost(dec!(1.23456)), Ok(dec!(1.2346)));
        assert_eq!(normalize_unit_cost(dec!(2.5)), Ok(dec!(2.5)));
        assert!(matches!(
            normalize_unit_cost(dec!(-0.01)),
            Err(StockError::InvalidOperation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// The blended cost always lies between the two input costs.
        #[test]
        fn blended_cost_is_bounded_by_inputs(
            on_hand in 0i64..100_000,
            held_cents in 0i64..1_000_000,
            incoming in 1i64..100_000,
            incoming_cents in 0i64..1_000_000,
        ) {
            let held_cost = Decimal::new(held_cents, 2);
            let incoming_cost = Decimal::new(incoming_cents, 2);
            let blended = weighted_average_cost(on_hand, held_cost, incoming, incoming_cost).unwrap();

            let lo = held_cost.min(incoming_cost);
            let hi = held_cost.max(incoming_cost);
            let slack = Decimal::new(1, COST_SCALE);
            if on_hand == 0 {
                prop_assert_eq!(blended, incoming_cost);
            } else {
                prop_assert!(blended >= lo - slack && blended <= hi + slack);
            }
        }
    }
}
