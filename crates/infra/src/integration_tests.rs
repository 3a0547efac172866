//! Integration tests for the full inventory pipeline.
//!
//! Tests: Service → CommandDispatcher → EventStore → EventBus → Projection
//!
//! Verifies:
//! - Purchase receipts, sales and opname adjustments compose into one ledger
//! - Bus subscribers see the same movements the ledger recorded
//! - Tenant isolation is preserved
//! - Concurrent writers on one product never oversell or lose updates

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use serde_json::Value as JsonValue;

    use stockledger_core::{AggregateId, TenantId, UserId};
    use stockledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use stockledger_inventory::{MovementType, ProductId, ReferenceType};
    use stockledger_purchasing::{LineInput, PurchaseOrderStatus, ReceiptLine};

    use crate::alerts::{InMemoryAlertSink, StockAlert};
    use crate::catalog::InMemoryProductCatalog;
    use crate::command_dispatcher::DispatchError;
    use crate::config::InventoryConfig;
    use crate::event_store::InMemoryEventStore;
    use crate::projections::{StockLevel, StockLevelsProjection};
    use crate::read_model::InMemoryTenantStore;
    use crate::services::{
        InventoryEngine, MovementFilter, MovementRequest, NewOpname, NewPurchaseOrder,
    };

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Engine = InventoryEngine<Arc<InMemoryEventStore>, Bus>;

    struct Harness {
        engine: Engine,
        bus: Bus,
        catalog: Arc<InMemoryProductCatalog>,
        alerts: Arc<InMemoryAlertSink>,
    }

    fn setup() -> Harness {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let alerts = Arc::new(InMemoryAlertSink::new());
        let config = InventoryConfig {
            max_append_attempts: 100,
            ..InventoryConfig::default()
        };
        let engine = InventoryEngine::new(
            Arc::new(InMemoryEventStore::new()),
            bus.clone(),
            catalog.clone(),
            alerts.clone(),
            &config,
        );
        Harness {
            engine,
            bus,
            catalog,
            alerts,
        }
    }

    fn product() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn sale(product_id: ProductId, quantity: i64, actor: UserId) -> MovementRequest {
        MovementRequest {
            product_id,
            movement_type: MovementType::Out,
            direction: None,
            quantity,
            cost_per_unit: None,
            reference_type: ReferenceType::Sale,
            reference_id: format!("so-{quantity}"),
            actor,
            note: None,
            occurred_at: None,
        }
    }

    fn purchase(product_id: ProductId, quantity: i64, submit: bool) -> NewPurchaseOrder {
        NewPurchaseOrder {
            supplier_name: "Northwind".to_string(),
            po_date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
            items: vec![LineInput {
                product_id,
                quantity_ordered: quantity,
                cost_per_unit: dec!(12.50),
            }],
            notes: None,
            submit,
        }
    }

    #[test]
    fn receipt_sale_and_count_compose_into_one_ledger() {
        let h = setup();
        let tenant_id = TenantId::new();
        let actor = UserId::new();
        let p = product();
        h.catalog.upsert(tenant_id, p, 20).unwrap();

        let po = h.engine.purchasing.create(tenant_id, purchase(p, 100, true), actor).unwrap();
        let report = h
            .engine
            .purchasing
            .receive(tenant_id, po.po_id, vec![ReceiptLine { product_id: p, quantity: 100 }], actor)
            .unwrap();
        assert_eq!(report.status, PurchaseOrderStatus::Received);

        h.engine.ledger.append_movement(tenant_id, sale(p, 75, actor)).unwrap();

        let count = h
            .engine
            .opname
            .create(
                tenant_id,
                NewOpname {
                    product_id: p,
                    actual_qty: 22,
                    notes: None,
                },
                actor,
            )
            .unwrap();
        let outcome = h.engine.opname.process(tenant_id, count.opname_id, actor).unwrap();
        assert_eq!(outcome.discrepancy, -3);

        let state = h.engine.ledger.get_current_state(tenant_id, p).unwrap();
        assert_eq!(state.level.on_hand_qty, 22);
        assert_eq!(state.level.avg_unit_cost, dec!(12.50));
        assert_eq!(state.min_stock_threshold, Some(20));

        // 100 -> 25 -> 22 stays above the threshold.
        assert!(h.alerts.all().is_empty());
        assert!(h.engine.analytics.low_stock(tenant_id).is_empty());
        h.engine.ledger.append_movement(tenant_id, sale(p, 2, actor)).unwrap();
        assert_eq!(h.alerts.all().len(), 1);
        assert!(matches!(h.alerts.all()[0].1, StockAlert::LowStock { on_hand_qty: 20, .. }));

        let audit = h.engine.ledger.audit(tenant_id, p).unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.movement_count, 4);
    }

    #[test]
    fn bus_subscriber_projection_matches_ledger() {
        let h = setup();
        let tenant_id = TenantId::new();
        let actor = UserId::new();
        let p = product();

        let mirror: Arc<StockLevelsProjection<InMemoryTenantStore<ProductId, StockLevel>>> =
            Arc::new(StockLevelsProjection::new(InMemoryTenantStore::new()));
        let subscription = h.bus.subscribe();

        let po = h.engine.purchasing.create(tenant_id, purchase(p, 10, true), actor).unwrap();
        h.engine
            .purchasing
            .receive(tenant_id, po.po_id, vec![ReceiptLine { product_id: p, quantity: 10 }], actor)
            .unwrap();
        h.engine.ledger.append_movement(tenant_id, sale(p, 4, actor)).unwrap();

        // PO events share the bus and are skipped by the stock projection.
        for envelope in subscription.drain() {
            mirror.apply_envelope(&envelope).unwrap();
        }

        assert_eq!(mirror.get(tenant_id, &p), Some(h.engine.ledger.get_current_state(tenant_id, p).unwrap().level));
    }

    #[test]
    fn tenants_never_see_each_other() {
        let h = setup();
        let (tenant_a, tenant_b) = (TenantId::new(), TenantId::new());
        let actor = UserId::new();
        let p = product();

        let po = h.engine.purchasing.create(tenant_a, purchase(p, 5, true), actor).unwrap();
        h.engine
            .purchasing
            .receive(tenant_a, po.po_id, vec![ReceiptLine { product_id: p, quantity: 5 }], actor)
            .unwrap();

        assert!(h.engine.ledger.get_current_state(tenant_b, p).is_none());
        assert_eq!(h.engine.ledger.get_movement_history(tenant_b, p, &MovementFilter::default()).total, 0);
        assert!(matches!(
            h.engine.purchasing.get(tenant_b, po.po_id),
            Err(DispatchError::NotFound)
        ));
        assert!(h.engine.purchasing.list(tenant_b, None).is_empty());
        assert!(h.engine.analytics.valuation_report(tenant_b).lines.is_empty());

        let err = h.engine.ledger.append_movement(tenant_b, sale(p, 1, actor)).unwrap_err();
        assert!(matches!(err, DispatchError::InsufficientStock { available: 0, requested: 1 }));
    }

    #[test]
    fn concurrent_receipts_and_sales_keep_the_balance() {
        let h = Arc::new(setup());
        let tenant_id = TenantId::new();
        let actor = UserId::new();
        let p = product();

        let orders: Vec<_> = (0..4)
            .map(|_| h.engine.purchasing.create(tenant_id, purchase(p, 10, true), actor).unwrap().po_id)
            .collect();

        let receivers: Vec<_> = orders
            .into_iter()
            .map(|po_id| {
                let h = h.clone();
                thread::spawn(move || {
                    for _ in 0..5 {
                        h.engine
                            .purchasing
                            .receive(tenant_id, po_id, vec![ReceiptLine { product_id: p, quantity: 2 }], actor)
                            .unwrap();
                    }
                })
            })
            .collect();
        let sellers: Vec<_> = (0..4)
            .map(|_| {
                let h = h.clone();
                thread::spawn(move || {
                    (0..10)
                        .filter(|_| h.engine.ledger.append_movement(tenant_id, sale(p, 1, actor)).is_ok())
                        .count() as i64
                })
            })
            .collect();

        for r in receivers {
            r.join().unwrap();
        }
        let sold: i64 = sellers.into_iter().map(|s| s.join().unwrap()).sum();

        let audit = h.engine.ledger.audit(tenant_id, p).unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.recorded.on_hand_qty, 40 - sold);
        assert!(audit.recorded.on_hand_qty >= 0);
        assert_eq!(h.engine.purchasing.list(tenant_id, Some(PurchaseOrderStatus::Received)).len(), 4);
    }

    #[test]
    fn concurrent_process_of_one_opname_adjusts_once() {
        let h = Arc::new(setup());
        let tenant_id = TenantId::new();
        let actor = UserId::new();
        let p = product();
        let po = h.engine.purchasing.create(tenant_id, purchase(p, 50, true), actor).unwrap();
        h.engine
            .purchasing
            .receive(tenant_id, po.po_id, vec![ReceiptLine { product_id: p, quantity: 50 }], actor)
            .unwrap();
        let count = h
            .engine
            .opname
            .create(
                tenant_id,
                NewOpname {
                    product_id: p,
                    actual_qty: 47,
                    notes: None,
                },
                actor,
            )
            .unwrap();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let h = h.clone();
                let id = count.opname_id;
                thread::spawn(move || h.engine.opname.process(tenant_id, id, actor).unwrap())
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

        assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
        let adjustments = h.engine.ledger.get_movement_history(
            tenant_id,
            p,
            &MovementFilter {
                reference_type: Some(ReferenceType::Opname),
                ..Default::default()
            },
        );
        assert_eq!(adjustments.total, 1);
        assert_eq!(h.engine.ledger.get_current_state(tenant_id, p).unwrap().level.on_hand_qty, 47);
    }
}
