//! Read-only stock analytics: low stock, dead stock and valuation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use stockledger_core::TenantId;
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{ProductId, stock_value};

use crate::event_store::EventStore;

use super::ledger::StockLedger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockRow {
    pub product_id: ProductId,
    pub on_hand_qty: i64,
    pub min_stock_threshold: i64,
    /// `min_stock_threshold - on_hand_qty`, never negative.
    pub shortfall: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadStockRow {
    pub product_id: ProductId,
    pub on_hand_qty: i64,
    pub avg_unit_cost: Decimal,
    pub stock_value: Decimal,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub last_movement_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValuationLine {
    pub product_id: ProductId,
    pub on_hand_qty: i64,
    pub avg_unit_cost: Decimal,
    pub stock_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValuationReport {
    pub lines: Vec<ValuationLine>,
    pub total_quantity: i64,
    pub total_value: Decimal,
    pub generated_at: DateTime<Utc>,
}

/// Queries over the stock-level rows and the catalog. Never writes.
pub struct InventoryAnalytics<S, B> {
    ledger: Arc<StockLedger<S, B>>,
    dead_stock_window_days: u32,
}

impl<S, B> InventoryAnalytics<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(ledger: Arc<StockLedger<S, B>>, dead_stock_window_days: u32) -> Self {
        Self {
            ledger,
            dead_stock_window_days,
        }
    }

    pub fn default_window_days(&self) -> u32 {
        self.dead_stock_window_days
    }

    /// Products at or below their threshold, largest shortfall first.
    ///
    /// Products the catalog does not know are skipped.
    pub fn low_stock(&self, tenant_id: TenantId) -> Vec<LowStockRow> {
        let catalog = self.ledger.catalog();
        let mut rows: Vec<LowStockRow> = self
            .ledger
            .levels(tenant_id)
            .into_iter()
            .filter_map(|level| {
                let threshold = catalog.get_product(tenant_id, level.product_id)?.min_stock_threshold;
                (level.on_hand_qty <= threshold).then(|| LowStockRow {
                    product_id: level.product_id,
                    on_hand_qty: level.on_hand_qty,
                    min_stock_threshold: threshold,
                    shortfall: threshold - level.on_hand_qty,
                })
            })
            .collect();

        rows.sort_by(|a, b| b.shortfall.cmp(&a.shortfall).then(a.product_id.cmp(&b.product_id)));
        rows
    }

    pub fn dead_stock(&self, tenant_id: TenantId, window_days: Option<u32>) -> Vec<DeadStockRow> {
        self.dead_stock_as_of(tenant_id, window_days.unwrap_or(self.dead_stock_window_days), Utc::now())
    }

    /// Products holding stock with no outbound movement since `now - window_days`.
    pub fn dead_stock_as_of(&self, tenant_id: TenantId, window_days: u32, now: DateTime<Utc>) -> Vec<DeadStockRow> {
        // Windows reaching past the representable range cover all history.
        let cutoff = Duration::try_days(i64::from(window_days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut rows: Vec<DeadStockRow> = self
            .ledger
            .levels(tenant_id)
            .into_iter()
            .filter(|level| level.on_hand_qty > 0)
            .filter(|level| level.last_outbound_at.is_none_or(|at| at < cutoff))
            .map(|level| DeadStockRow {
                product_id: level.product_id,
                on_hand_qty: level.on_hand_qty,
                avg_unit_cost: level.avg_unit_cost,
                stock_value: stock_value(level.on_hand_qty, level.avg_unit_cost),
                last_outbound_at: level.last_outbound_at,
                last_movement_at: level.last_movement_at,
            })
            .collect();

        rows.sort_by(|a, b| b.stock_value.cmp(&a.stock_value).then(a.product_id.cmp(&b.product_id)));
        rows
    }

    /// Per-product value at weighted-average cost, plus totals.
    pub fn valuation_report(&self, tenant_id: TenantId) -> ValuationReport {
        let lines: Vec<ValuationLine> = self
            .ledger
            .levels(tenant_id)
            .into_iter()
            .map(|level| ValuationLine {
                product_id: level.product_id,
                on_hand_qty: level.on_hand_qty,
                avg_unit_cost: level.avg_unit_cost,
                stock_value: stock_value(level.on_hand_qty, level.avg_unit_cost),
            })
            .collect();

        ValuationReport {
            total_quantity: lines.iter().fold(0i64, |acc, l| acc.saturating_add(l.on_hand_qty)),
            total_value: lines.iter().fold(Decimal::ZERO, |acc, l| acc.saturating_add(l.stock_value)),
            lines,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use stockledger_core::{AggregateId, UserId};
    use stockledger_events::InMemoryEventBus;
    use stockledger_inventory::{MovementType, ReferenceType};

    use super::*;
    use crate::alerts::InMemoryAlertSink;
    use crate::catalog::InMemoryProductCatalog;
    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::InMemoryEventStore;
    use crate::services::ledger::MovementRequest;

    type Ledger = StockLedger<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    struct Fixture {
        analytics: InventoryAnalytics<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>,
        ledger: Arc<Ledger>,
        catalog: Arc<InMemoryProductCatalog>,
        tenant_id: TenantId,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let ledger = Arc::new(StockLedger::new(
            CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new())),
            catalog.clone(),
            Arc::new(InMemoryAlertSink::new()),
        ));
        Fixture {
            analytics: InventoryAnalytics::new(ledger.clone(), 90),
            ledger,
            catalog,
            tenant_id: TenantId::new(),
        }
    }

    fn post(f: &Fixture, product_id: ProductId, movement_type: MovementType, qty: i64, at: DateTime<Utc>) {
        let (reference_type, cost) = match movement_type {
            MovementType::In => (ReferenceType::Purchase, Some(dec!(2.50))),
            _ => (ReferenceType::Sale, None),
        };
        f.ledger
            .append_movement(
                f.tenant_id,
                MovementRequest {
                    product_id,
                    movement_type,
                    direction: None,
                    quantity: qty,
                    cost_per_unit: cost,
                    reference_type,
                    reference_id: "ref".to_string(),
                    actor: UserId::new(),
                    note: None,
                    occurred_at: Some(at),
                },
            )
            .unwrap();
    }

    fn product() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    #[test]
    fn low_stock_orders_by_shortfall_and_skips_unknown_products() {
        let f = fixture();
        let now = Utc::now();
        let (a, b, unknown) = (product(), product(), product());
        f.catalog.upsert(f.tenant_id, a, 10).unwrap();
        f.catalog.upsert(f.tenant_id, b, 10).unwrap();
        post(&f, a, MovementType::In, 5, now);
        post(&f, b, MovementType::In, 2, now);
        post(&f, unknown, MovementType::In, 1, now);

        let rows = f.analytics.low_stock(f.tenant_id);
        assert_eq!(rows.iter().map(|r| r.product_id).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(rows[0].shortfall, 8);

        post(&f, a, MovementType::In, 20, now);
        assert_eq!(f.analytics.low_stock(f.tenant_id).len(), 1);
    }

    #[test]
    fn dead_stock_uses_last_outbound_movement() {
        let f = fixture();
        let now = Utc::now();
        let (stale, selling, empty) = (product(), product(), product());
        post(&f, stale, MovementType::In, 5, now - Duration::days(200));
        post(&f, stale, MovementType::Out, 1, now - Duration::days(120));
        post(&f, selling, MovementType::In, 5, now - Duration::days(200));
        post(&f, selling, MovementType::Out, 1, now - Duration::days(3));
        post(&f, empty, MovementType::In, 1, now - Duration::days(200));
        post(&f, empty, MovementType::Out, 1, now - Duration::days(150));

        let rows = f.analytics.dead_stock_as_of(f.tenant_id, 90, now);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product_id, stale);
        assert_eq!(rows[0].stock_value, dec!(10.00));

        assert!(f.analytics.dead_stock_as_of(f.tenant_id, 365, now).is_empty());
    }

    #[test]
    fn backdated_sale_does_not_hide_a_recent_one() {
        let f = fixture();
        let now = Utc::now();
        let recent = now - Duration::days(2);
        let p = product();
        post(&f, p, MovementType::In, 5, now - Duration::days(200));
        post(&f, p, MovementType::Out, 1, recent);
        post(&f, p, MovementType::Out, 1, now - Duration::days(150));

        assert!(f.analytics.dead_stock_as_of(f.tenant_id, 90, now).is_empty());
        let level = f.ledger.levels(f.tenant_id).into_iter().find(|l| l.product_id == p).unwrap();
        assert_eq!(level.last_outbound_at, Some(recent));
        assert_eq!(level.last_movement_at, recent);
        assert_eq!(level.on_hand_qty, 3);
    }

    #[test]
    fn oversized_window_covers_all_history() {
        let f = fixture();
        let now = Utc::now();
        let (never_sold, sold) = (product(), product());
        post(&f, never_sold, MovementType::In, 5, now - Duration::days(10));
        post(&f, sold, MovementType::In, 5, now - Duration::days(10));
        post(&f, sold, MovementType::Out, 1, now - Duration::days(1));

        let rows = f.analytics.dead_stock_as_of(f.tenant_id, u32::MAX, now);
        assert_eq!(rows.iter().map(|r| r.product_id).collect::<Vec<_>>(), vec![never_sold]);
    }

    #[test]
    fn valuation_totals_match_lines() {
        let f = fixture();
        let now = Utc::now();
        post(&f, product(), MovementType::In, 4, now);
        post(&f, product(), MovementType::In, 6, now);

        let report = f.analytics.valuation_report(f.tenant_id);
        assert_eq!(report.lines.len(), 2);
        assert_eq!(report.total_quantity, 10);
        assert_eq!(report.total_value, dec!(25.00));
        assert!(f.analytics.valuation_report(TenantId::new()).lines.is_empty());
    }
}
