use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

use rust_decimal_macros::dec;
use serde_json::Value as JsonValue;
use stockledger_core::{AggregateId, TenantId, UserId};
use stockledger_events::{EventEnvelope, InMemoryEventBus};
use stockledger_infra::alerts::TracingAlertSink;
use stockledger_infra::catalog::InMemoryProductCatalog;
use stockledger_infra::command_dispatcher::CommandDispatcher;
use stockledger_infra::event_store::InMemoryEventStore;
use stockledger_infra::services::{MovementRequest, StockLedger};
use stockledger_inventory::{MovementType, ProductId, ReferenceType, weighted_average_cost};

type Ledger = StockLedger<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

fn ledger() -> Ledger {
    StockLedger::new(
        CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(InMemoryEventBus::new())),
        Arc::new(InMemoryProductCatalog::new()),
        Arc::new(TracingAlertSink),
    )
}

fn receipt(product_id: ProductId, quantity: i64, actor: UserId) -> MovementRequest {
    MovementRequest {
        product_id,
        movement_type: MovementType::In,
        direction: None,
        quantity,
        cost_per_unit: Some(dec!(3.25)),
        reference_type: ReferenceType::Purchase,
        reference_id: "po-bench".to_string(),
        actor,
        note: None,
        occurred_at: None,
    }
}

fn seeded(movements: usize) -> (Ledger, TenantId, ProductId, UserId) {
    let ledger = ledger();
    let tenant_id = TenantId::new();
    let product_id = ProductId::new(AggregateId::new());
    let actor = UserId::new();
    for _ in 0..movements {
        ledger.append_movement(tenant_id, receipt(product_id, 1, actor)).unwrap();
    }
    (ledger, tenant_id, product_id, actor)
}

fn bench_append_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_movement_latency");

    group.bench_function("first_movement", |b| {
        let (ledger, tenant_id, _, actor) = seeded(0);
        b.iter(|| {
            let product_id = ProductId::new(AggregateId::new());
            ledger
                .append_movement(tenant_id, receipt(product_id, black_box(5), actor))
                .unwrap();
        });
    });

    for history in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("with_history", history), &history, |b, &history| {
            let (ledger, tenant_id, product_id, actor) = seeded(history);
            b.iter(|| {
                ledger
                    .append_movement(tenant_id, receipt(product_id, black_box(1), actor))
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("stock_levels_rebuild");

    for movements in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(movements as u64));
        group.bench_with_input(BenchmarkId::new("single_product", movements), &movements, |b, &movements| {
            let (ledger, tenant_id, _, _) = seeded(movements);
            b.iter(|| black_box(ledger.rebuild(tenant_id).unwrap()));
        });
    }

    group.finish();
}

fn bench_weighted_average(c: &mut Criterion) {
    c.bench_function("weighted_average_cost", |b| {
        b.iter(|| {
            weighted_average_cost(
                black_box(1_250),
                black_box(dec!(17.333333)),
                black_box(40),
                black_box(dec!(18.10)),
            )
        })
    });
}

criterion_group!(benches, bench_append_latency, bench_rebuild, bench_weighted_average);
criterion_main!(benches);
