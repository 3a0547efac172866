//! Valuation calculator: weighted-average unit cost.
//!
//! Cost basis is only ever set by incoming stock. Outbound, return and
//! adjustment movements move quantity at the current average and leave the
//! average untouched.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::movement::{MovementType, StockMovement};

/// Decimal places kept on the average unit cost.
pub const AVERAGE_COST_SCALE: u32 = 6;

/// Recompute the average after receiving `quantity` units at `cost_per_unit`.
///
/// `new_avg = (qty_before * avg_before + quantity * cost) / (qty_before + quantity)`
///
/// Returns `None` when an intermediate value does not fit in a `Decimal`.
pub fn weighted_average_cost(
    on_hand_before: i64,
    avg_before: Decimal,
    quantity: i64,
    cost_per_unit: Decimal,
) -> Option<Decimal> {
    let total_qty = on_hand_before.max(0).checked_add(quantity)?;
    if total_qty <= 0 {
        return Some(avg_before);
    }

    let existing = Decimal::from(on_hand_before.max(0)).checked_mul(avg_before)?;
    let incoming = Decimal::from(quantity).checked_mul(cost_per_unit)?;
    let avg = existing.checked_add(incoming)?.checked_div(Decimal::from(total_qty))?;
    Some(avg.round_dp_with_strategy(AVERAGE_COST_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

/// Balance-sheet value of a position, or `None` if it does not fit in a `Decimal`.
pub fn checked_stock_value(on_hand: i64, avg_unit_cost: Decimal) -> Option<Decimal> {
    Decimal::from(on_hand.max(0)).checked_mul(avg_unit_cost)
}

/// Balance-sheet value of a position, saturating at `Decimal::MAX`.
///
/// Recorded positions always fit; saturation only matters for report totals.
pub fn stock_value(on_hand: i64, avg_unit_cost: Decimal) -> Decimal {
    checked_stock_value(on_hand, avg_unit_cost).unwrap_or(Decimal::MAX)
}

/// Quantity and average cost at some point in a product's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockPosition {
    pub on_hand_qty: i64,
    pub avg_unit_cost: Decimal,
}

impl StockPosition {
    /// Fold one movement into the position.
    pub fn apply(&mut self, movement: &StockMovement) {
        if movement.movement_type == MovementType::In {
            if let Some(cost) = movement.cost_per_unit.filter(|c| *c > Decimal::ZERO) {
                // Recorded movements were computed with the same arithmetic, so this fits.
                self.avg_unit_cost =
                    weighted_average_cost(self.on_hand_qty, self.avg_unit_cost, movement.quantity, cost)
                        .unwrap_or(movement.avg_unit_cost_after);
            }
        }
        self.on_hand_qty += movement.signed_quantity();
    }
}

/// Replay movements in `movement_id` order and derive the resulting position.
///
/// Used for audits: the result must equal the stored state and the snapshot
/// carried by the last movement.
pub fn replay_position<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> StockPosition {
    let mut sorted: Vec<&StockMovement> = movements.into_iter().collect();
    sorted.sort_by_key(|m| m.movement_id);

    let mut position = StockPosition::default();
    for m in sorted {
        position.apply(m);
    }
    position
}
