use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, DomainError, TenantId, UserId};
use stockledger_events::Event;

use crate::movement::{MovementType, ProductId, ReferenceType, StockDirection, StockMovement};
use crate::valuation::{checked_stock_value, weighted_average_cost};

/// Stream/aggregate type name for product stock positions.
pub const STOCK_AGGREGATE_TYPE: &str = "inventory.stock";

/// Aggregate root: the stock position of one product.
///
/// Created implicitly by the first recorded movement and never deleted; a
/// position that reaches zero stays around with its cost basis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    id: ProductId,
    tenant_id: Option<TenantId>,
    on_hand_qty: i64,
    avg_unit_cost: Decimal,
    last_movement_at: Option<DateTime<Utc>>,
    version: u64,
}

impl ProductStock {
    /// Create an empty position for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            on_hand_qty: 0,
            avg_unit_cost: Decimal::ZERO,
            last_movement_at: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn on_hand_qty(&self) -> i64 {
        self.on_hand_qty
    }

    pub fn avg_unit_cost(&self) -> Decimal {
        self.avg_unit_cost
    }

    pub fn last_movement_at(&self) -> Option<DateTime<Utc>> {
        self.last_movement_at
    }

    /// Whether any movement has been recorded yet.
    pub fn exists(&self) -> bool {
        self.version > 0
    }
}

impl AggregateRoot for ProductStock {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordMovement (the ledger's single append operation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    /// Required for `ADJUSTMENT`; must be absent or agree with the type otherwise.
    pub direction: Option<StockDirection>,
    pub quantity: i64,
    pub cost_per_unit: Option<Decimal>,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub actor: UserId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    RecordMovement(RecordMovement),
}

/// Event: MovementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub tenant_id: TenantId,
    pub movement: StockMovement,
    /// Threshold comparisons need the quantity before the movement as well.
    pub on_hand_before: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    MovementRecorded(MovementRecorded),
}

impl StockEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            StockEvent::MovementRecorded(e) => e.tenant_id,
        }
    }

    pub fn product_id(&self) -> ProductId {
        match self {
            StockEvent::MovementRecorded(e) => e.movement.product_id,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::MovementRecorded(_) => "inventory.stock.movement_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::MovementRecorded(e) => e.movement.created_at,
        }
    }
}

impl Aggregate for ProductStock {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::MovementRecorded(e) => {
                self.id = e.movement.product_id;
                if self.tenant_id.is_none() {
                    self.tenant_id = Some(e.tenant_id);
                }
                self.on_hand_qty = e.movement.resulting_on_hand_qty;
                self.avg_unit_cost = e.movement.avg_unit_cost_after;
                self.last_movement_at = Some(e.movement.created_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::RecordMovement(cmd) => self.handle_record(cmd),
        }
    }
}

impl ProductStock {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        match self.tenant_id {
            Some(t) if t != tenant_id => Err(DomainError::invariant("tenant mismatch")),
            _ => Ok(()),
        }
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn resolve_direction(cmd: &RecordMovement) -> Result<StockDirection, DomainError> {
        match (cmd.movement_type.implied_direction(), cmd.direction) {
            (None, Some(d)) => Ok(d),
            (None, None) => Err(DomainError::validation(
                "adjustment movements require an explicit direction",
            )),
            (Some(implied), None) => Ok(implied),
            (Some(implied), Some(given)) if implied == given => Ok(implied),
            (Some(_), Some(_)) => Err(DomainError::validation(format!(
                "direction conflicts with movement type {}",
                cmd.movement_type.as_str()
            ))),
        }
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.reference_id.trim().is_empty() {
            return Err(DomainError::validation("reference_id cannot be empty"));
        }
        if !cmd.movement_type.accepts_reference(cmd.reference_type) {
            return Err(DomainError::validation(format!(
                "{} movements cannot reference {}",
                cmd.movement_type.as_str(),
                cmd.reference_type.as_str()
            )));
        }
        if cmd.cost_per_unit.is_some_and(|c| c < Decimal::ZERO) {
            return Err(DomainError::validation("cost_per_unit cannot be negative"));
        }

        let direction = Self::resolve_direction(cmd)?;

        let cost_per_unit = match cmd.movement_type {
            MovementType::In => Some(cmd.cost_per_unit.ok_or_else(|| {
                DomainError::validation("IN movements require cost_per_unit")
            })?),
            MovementType::Out | MovementType::Return => None,
            MovementType::Adjustment => cmd.cost_per_unit,
        };

        let resulting_on_hand_qty = self
            .on_hand_qty
            .checked_add(direction.sign() * cmd.quantity)
            .ok_or_else(|| DomainError::validation("quantity overflow"))?;
        if resulting_on_hand_qty < 0 {
            return Err(DomainError::insufficient_stock(self.on_hand_qty, cmd.quantity));
        }

        let avg_unit_cost_after = match (cmd.movement_type, cost_per_unit) {
            (MovementType::In, Some(cost)) if cost > Decimal::ZERO => {
                weighted_average_cost(self.on_hand_qty, self.avg_unit_cost, cmd.quantity, cost)
                    .ok_or_else(|| DomainError::validation("cost overflow"))?
            }
            _ => self.avg_unit_cost,
        };
        if checked_stock_value(resulting_on_hand_qty, avg_unit_cost_after).is_none() {
            return Err(DomainError::validation("cost overflow"));
        }

        Ok(vec![StockEvent::MovementRecorded(MovementRecorded {
            tenant_id: cmd.tenant_id,
            on_hand_before: self.on_hand_qty,
            movement: StockMovement {
                movement_id: self.version + 1,
                product_id: cmd.product_id,
                movement_type: cmd.movement_type,
                direction,
                quantity: cmd.quantity,
                cost_per_unit,
                reference_type: cmd.reference_type,
                reference_id: cmd.reference_id.clone(),
                resulting_on_hand_qty,
                avg_unit_cost_after,
                note: cmd.note.clone(),
                created_at: cmd.occurred_at,
                created_by: cmd.actor,
            },
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuation::replay_position;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockledger_core::AggregateId;

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn movement(
        tenant_id: TenantId,
        product_id: ProductId,
        movement_type: MovementType,
        quantity: i64,
        cost: Option<Decimal>,
    ) -> RecordMovement {
        let reference_type = match movement_type {
            MovementType::In => ReferenceType::Purchase,
            MovementType::Out => ReferenceType::Sale,
            MovementType::Return => ReferenceType::Return,
            MovementType::Adjustment => ReferenceType::Adjustment,
        };
        RecordMovement {
            tenant_id,
            product_id,
            movement_type,
            direction: None,
            quantity,
            cost_per_unit: cost,
            reference_type,
            reference_id: "ref-1".to_string(),
            actor: UserId::new(),
            note: None,
            occurred_at: Utc::now(),
        }
    }

    fn record(stock: &mut ProductStock, cmd: RecordMovement) -> Result<StockMovement, DomainError> {
        let events = stock.handle(&StockCommand::RecordMovement(cmd))?;
        for e in &events {
            stock.apply(e);
        }
        let StockEvent::MovementRecorded(e) = &events[0];
        Ok(e.movement.clone())
    }

    #[test]
    fn receipts_recompute_weighted_average_and_sales_do_not() {
        let tenant_id = TenantId::new();
        let product_id = test_product_id();
        let mut stock = ProductStock::empty(product_id);

        record(&mut stock, movement(tenant_id, product_id, MovementType::In, 10, Some(dec!(5)))).unwrap();
        record(&mut stock, movement(tenant_id, product_id, MovementType::In, 10, Some(dec!(7)))).unwrap();
        assert_eq!(stock.on_hand_qty(), 20);
        assert_eq!(stock.avg_unit_cost(), dec!(6));

        let out = record(&mut stock, movement(tenant_id, product_id, MovementType::Out, 4, None)).unwrap();
        assert_eq!(out.resulting_on_hand_qty, 16);
        assert_eq!(stock.avg_unit_cost(), dec!(6));
    }

    #[test]
    fn movement_ids_follow_stream_order() {
        let tenant_id = TenantId::new();
        let product_id = test_product_id();
        let mut stock = ProductStock::empty(product_id);

        let first = record(&mut stock, movement(tenant_id, product_id, MovementType::In, 3, Some(dec!(1)))).unwrap();
        let second = record(&mut stock, movement(tenant_id, product_id, MovementType::Out, 1, None)).unwrap();

        assert_eq!(first.movement_id, 1);
        assert_eq!(second.movement_id, 2);
        assert_eq!(stock.version(), 2);
    }

    #[test]
    fn out_beyond_on_hand_is_rejected_without_effect() {
        let tenant_id = TenantId::new();
        let product_id = test_product_id();
        let mut stock = ProductStock::empty(product_id);
        record(&mut stock, movement(tenant_id, product_id, MovementType::In, 5, Some(dec!(2)))).unwrap();

        let before = stock.clone();
        let err = record(&mut stock, movement(tenant_id, product_id, MovementType::Out, 6, None)).unwrap_err();

        assert_eq!(err, DomainError::insufficient_stock(5, 6));
        assert_eq!(stock, before);
    }

    #[test]
    fn cost_outside_decimal_range_is_rejected_without_effect() {
        let tenant_id = TenantId::new();
        let product_id = test_product_id();
        let mut stock = ProductStock::empty(product_id);
        record(&mut stock, movement(tenant_id, product_id, MovementType::In, 5, Some(dec!(2)))).unwrap();

        let before = stock.clone();
        let huge = Decimal::MAX / dec!(10);
        let err = record(&mut stock, movement(tenant_id, product_id, MovementType::In, 1_000, Some(huge)))
            .unwrap_err();

        assert_eq!(err, DomainError::validation("cost overflow"));
        assert_eq!(stock, before);
    }

    #[test]
    fn in_requires_cost() {
        let product_id = test_product_id();
        let stock = ProductStock::empty(product_id);
        let cmd = movement(TenantId::new(), product_id, MovementType::In, 5, None);

        let err = stock.handle(&StockCommand::RecordMovement(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("cost_per_unit")));
    }

    #[test]
    fn zero_cost_receipt_keeps_existing_average() {
        let tenant_id = TenantId::new();
        let product_id = test_product_id();
        let mut stock = ProductStock::empty(product_id);
        record(&mut stock, movement(tenant_id, product_id, MovementType::In, 10, Some(dec!(4)))).unwrap();
        record(&mut stock, movement(tenant_id, product_id, MovementType::In, 10, Some(Decimal::ZERO))).unwrap();

        assert_eq!(stock.on_hand_qty(), 20);
        assert_eq!(stock.avg_unit_cost(), dec!(4));
    }

    #[test]
    fn adjustment_without_direction_is_rejected() {
        let product_id = test_product_id();
        let stock = ProductStock::empty(product_id);
        let cmd = movement(TenantId::new(), product_id, MovementType::Adjustment, 1, None);

        let err = stock.handle(&StockCommand::RecordMovement(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("explicit direction")));
    }

    #[test]
    fn conflicting_direction_is_rejected() {
        let product_id = test_product_id();
        let stock = ProductStock::empty(product_id);
        let mut cmd = movement(TenantId::new(), product_id, MovementType::Return, 1, None);
        cmd.direction = Some(StockDirection::Decrease);

        let err = stock.handle(&StockCommand::RecordMovement(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn decreasing_adjustment_cannot_go_negative() {
        let tenant_id = TenantId::new();
        let product_id = test_product_id();
        let mut stock = ProductStock::empty(product_id);
        record(&mut stock, movement(tenant_id, product_id, MovementType::In, 2, Some(dec!(1)))).unwrap();

        let mut cmd = movement(tenant_id, product_id, MovementType::Adjustment, 3, None);
        cmd.direction = Some(StockDirection::Decrease);
        let err = record(&mut stock, cmd).unwrap_err();

        assert!(matches!(err, DomainError::InsufficientStock { available: 2, requested: 3 }));
    }

    #[test]
    fn return_increases_stock_and_drops_cost() {
        let tenant_id = TenantId::new();
        let product_id = test_product_id();
        let mut stock = ProductStock::empty(product_id);
        record(&mut stock, movement(tenant_id, product_id, MovementType::In, 2, Some(dec!(3)))).unwrap();

        let ret = record(&mut stock, movement(tenant_id, product_id, MovementType::Return, 1, Some(dec!(99)))).unwrap();

        assert_eq!(ret.cost_per_unit, None);
        assert_eq!(stock.on_hand_qty(), 3);
        assert_eq!(stock.avg_unit_cost(), dec!(3));
    }

    #[test]
    fn incompatible_reference_is_rejected() {
        let product_id = test_product_id();
        let stock = ProductStock::empty(product_id);
        let mut cmd = movement(TenantId::new(), product_id, MovementType::Out, 1, None);
        cmd.reference_type = ReferenceType::Purchase;

        let err = stock.handle(&StockCommand::RecordMovement(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("cannot reference")));
    }

    #[test]
    fn other_tenant_cannot_write_to_position() {
        let tenant_id = TenantId::new();
        let product_id = test_product_id();
        let mut stock = ProductStock::empty(product_id);
        record(&mut stock, movement(tenant_id, product_id, MovementType::In, 1, Some(dec!(1)))).unwrap();

        let cmd = movement(TenantId::new(), product_id, MovementType::In, 1, Some(dec!(1)));
        let err = stock.handle(&StockCommand::RecordMovement(cmd)).unwrap_err();
        assert_eq!(err, DomainError::invariant("tenant mismatch"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        In(i64, i64),
        Out(i64),
        Adjust(bool, i64),
        Return(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50, 0i64..100).prop_map(|(q, c)| Op::In(q, c)),
            (1i64..60).prop_map(Op::Out),
            (any::<bool>(), 1i64..40).prop_map(|(up, q)| Op::Adjust(up, q)),
            (1i64..10).prop_map(Op::Return),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever mix of movements is attempted, accepted ones
        /// replay to the recorded on-hand quantity, never below zero, and
        /// rejected ones are exactly the decreases that exceeded stock.
        #[test]
        fn ledger_replays_to_on_hand_and_never_goes_negative(
            ops in prop::collection::vec(op_strategy(), 1..60)
        ) {
            let tenant_id = TenantId::new();
            let product_id = test_product_id();
            let mut stock = ProductStock::empty(product_id);
            let mut accepted: Vec<StockMovement> = Vec::new();

            for op in ops {
                let cmd = match op {
                    Op::In(q, c) => movement(tenant_id, product_id, MovementType::In, q, Some(Decimal::from(c))),
                    Op::Out(q) => movement(tenant_id, product_id, MovementType::Out, q, None),
                    Op::Return(q) => movement(tenant_id, product_id, MovementType::Return, q, None),
                    Op::Adjust(up, q) => {
                        let mut cmd = movement(tenant_id, product_id, MovementType::Adjustment, q, None);
                        cmd.direction = Some(if up { StockDirection::Increase } else { StockDirection::Decrease });
                        cmd
                    }
                };

                let before = stock.on_hand_qty();
                let is_decrease = matches!(cmd.movement_type, MovementType::Out)
                    || cmd.direction == Some(StockDirection::Decrease);
                let qty = cmd.quantity;

                match record(&mut stock, cmd) {
                    Ok(m) => {
                        prop_assert_eq!(m.resulting_on_hand_qty, stock.on_hand_qty());
                        accepted.push(m);
                    }
                    Err(DomainError::InsufficientStock { available, requested }) => {
                        prop_assert!(is_decrease);
                        prop_assert!(qty > before);
                        prop_assert_eq!(available, before);
                        prop_assert_eq!(requested, qty);
                        prop_assert_eq!(stock.on_hand_qty(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }

                prop_assert!(stock.on_hand_qty() >= 0);
            }

            let signed_sum: i64 = accepted.iter().map(|m| m.signed_quantity()).sum();
            prop_assert_eq!(signed_sum, stock.on_hand_qty());

            let replayed = replay_position(&accepted);
            prop_assert_eq!(replayed.on_hand_qty, stock.on_hand_qty());
            prop_assert_eq!(replayed.avg_unit_cost, stock.avg_unit_cost());
        }
    }
}
