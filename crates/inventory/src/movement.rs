use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateId, DomainError, UserId};

/// Product identifier (identity owned by the external product catalog).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for ProductId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Kind of quantity-changing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
    Return,
}

impl MovementType {
    /// Direction implied by the type, `None` for adjustments (caller-supplied).
    pub fn implied_direction(self) -> Option<StockDirection> {
        match self {
            MovementType::In | MovementType::Return => Some(StockDirection::Increase),
            MovementType::Out => Some(StockDirection::Decrease),
            MovementType::Adjustment => None,
        }
    }

    /// Reference types that may originate this movement type.
    pub fn accepts_reference(self, reference: ReferenceType) -> bool {
        use ReferenceType as R;
        match self {
            MovementType::In => matches!(reference, R::Purchase | R::Adjustment),
            MovementType::Out => matches!(reference, R::Sale | R::Adjustment),
            MovementType::Return => matches!(reference, R::Return),
            MovementType::Adjustment => matches!(reference, R::Adjustment | R::Opname),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::Return => "RETURN",
        }
    }
}

/// Which way a movement moves on-hand quantity.
///
/// `quantity` on a movement is always positive; direction is carried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockDirection {
    Increase,
    Decrease,
}

impl StockDirection {
    pub fn sign(self) -> i64 {
        match self {
            StockDirection::Increase => 1,
            StockDirection::Decrease => -1,
        }
    }
}

/// What originated a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Purchase,
    Sale,
    Adjustment,
    Return,
    Opname,
}

impl ReferenceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceType::Purchase => "PURCHASE",
            ReferenceType::Sale => "SALE",
            ReferenceType::Adjustment => "ADJUSTMENT",
            ReferenceType::Return => "RETURN",
            ReferenceType::Opname => "OPNAME",
        }
    }
}

/// Immutable ledger row.
///
/// `movement_id` is the position in the product's stream (1, 2, 3, ...), so it
/// totally orders movements per product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub movement_id: u64,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub direction: StockDirection,
    pub quantity: i64,
    pub cost_per_unit: Option<Decimal>,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    /// On-hand quantity immediately after this movement.
    pub resulting_on_hand_qty: i64,
    /// Weighted-average unit cost immediately after this movement.
    pub avg_unit_cost_after: Decimal,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

impl StockMovement {
    /// Quantity with the movement's direction applied.
    pub fn signed_quantity(&self) -> i64 {
        self.direction.sign() * self.quantity
    }

    /// Outbound for dead-stock purposes: an `OUT` movement or anything tied to a sale.
    pub fn is_outbound(&self) -> bool {
        self.movement_type == MovementType::Out || self.reference_type == ReferenceType::Sale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_adjustments_need_an_explicit_direction() {
        assert_eq!(MovementType::In.implied_direction(), Some(StockDirection::Increase));
        assert_eq!(MovementType::Return.implied_direction(), Some(StockDirection::Increase));
        assert_eq!(MovementType::Out.implied_direction(), Some(StockDirection::Decrease));
        assert_eq!(MovementType::Adjustment.implied_direction(), None);
    }

    #[test]
    fn reference_compatibility() {
        assert!(MovementType::In.accepts_reference(ReferenceType::Purchase));
        assert!(MovementType::Out.accepts_reference(ReferenceType::Sale));
        assert!(MovementType::Adjustment.accepts_reference(ReferenceType::Opname));
        assert!(!MovementType::Return.accepts_reference(ReferenceType::Sale));
        assert!(!MovementType::In.accepts_reference(ReferenceType::Opname));
    }

    #[test]
    fn outbound_covers_out_and_sale_references() {
        let mut m = StockMovement {
            movement_id: 1,
            product_id: ProductId::new(AggregateId::new()),
            movement_type: MovementType::Adjustment,
            direction: StockDirection::Decrease,
            quantity: 2,
            cost_per_unit: None,
            reference_type: ReferenceType::Adjustment,
            reference_id: "manual".to_string(),
            resulting_on_hand_qty: 8,
            avg_unit_cost_after: Decimal::ZERO,
            note: None,
            created_at: Utc::now(),
            created_by: UserId::new(),
        };
        assert!(!m.is_outbound());
        assert_eq!(m.signed_quantity(), -2);

        m.movement_type = MovementType::Out;
        assert!(m.is_outbound());
    }
}
