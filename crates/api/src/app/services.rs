use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use stockledger_core::TenantId;
use stockledger_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use stockledger_infra::{
    alerts::{StockAlertSink, TracingAlertSink},
    catalog::InMemoryProductCatalog,
    config::InventoryConfig,
    event_store::InMemoryEventStore,
    services::{InMemoryInventoryEngine, InventoryEngine},
    sweep::{StockSweepHandle, StockSweepRunner},
};
use stockledger_inventory::STOCK_AGGREGATE_TYPE;
use tracing::{info, warn};

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub engine: InMemoryInventoryEngine,
    pub catalog: Arc<InMemoryProductCatalog>,
    sweeps: Option<Arc<SweepRegistry>>,
}

/// Wire the in-memory engine, catalog and alert sink.
pub fn build_services(config: &InventoryConfig) -> AppServices {
    build_services_with_sink(config, Arc::new(TracingAlertSink))
}

pub fn build_services_with_sink(config: &InventoryConfig, alerts: Arc<dyn StockAlertSink>) -> AppServices {
    let catalog = Arc::new(InMemoryProductCatalog::new());
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());

    // Subscribe before anything can commit so no stock event is missed.
    let sub = StockSweepRunner::from_config(config).map(|runner| (runner, bus.subscribe()));

    let engine = InventoryEngine::new(store, bus, catalog.clone(), alerts.clone(), config);

    let sweeps = sub.and_then(|(runner, sub)| {
        let registry = Arc::new(SweepRegistry {
            runner,
            engine: engine.clone(),
            alerts,
            handles: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        match spawn_stock_listener(registry.clone(), sub) {
            Ok(()) => Some(registry),
            Err(e) => {
                warn!(error = %e, "failed to start stock event listener; sweeps disabled");
                None
            }
        }
    });

    AppServices {
        engine,
        catalog,
        sweeps,
    }
}

impl AppServices {
    /// Whether a background sweep is running for the tenant.
    pub fn has_sweep(&self, tenant_id: TenantId) -> bool {
        self.sweeps.as_ref().is_some_and(|s| s.contains(tenant_id))
    }

    /// Stop every running sweep thread. Later stock events start nothing.
    pub fn shutdown(&self) {
        if let Some(sweeps) = &self.sweeps {
            sweeps.close();
        }
    }
}

/// Per-tenant sweep threads, started on the tenant's first committed stock
/// movement and nudged on each one after that.
struct SweepRegistry {
    runner: StockSweepRunner,
    engine: InMemoryInventoryEngine,
    alerts: Arc<dyn StockAlertSink>,
    handles: Mutex<HashMap<TenantId, StockSweepHandle>>,
    closed: AtomicBool,
}

impl SweepRegistry {
    fn on_stock_event(&self, tenant_id: TenantId) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = handles.get(&tenant_id) {
            handle.trigger();
            return;
        }

        match self
            .runner
            .spawn_for_tenant("stock-sweep", tenant_id, self.engine.analytics.clone(), self.alerts.clone())
        {
            Ok(handle) => {
                info!(tenant = %tenant_id, "stock sweep scheduled");
                handles.insert(tenant_id, handle);
            }
            Err(e) => warn!(tenant = %tenant_id, error = %e, "failed to start stock sweep"),
        }
    }

    fn contains(&self, tenant_id: TenantId) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&tenant_id)
    }

    fn close(&self) {
        let handles: Vec<_> = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::SeqCst);
            handles.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            handle.shutdown();
        }
    }
}

const LISTENER_POLL: Duration = Duration::from_millis(250);

/// Bus subscriber: stock movements start or trigger their tenant's sweep.
/// Exits once the registry is closed or the bus goes away.
fn spawn_stock_listener(
    registry: Arc<SweepRegistry>,
    sub: Subscription<EventEnvelope<JsonValue>>,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name("stock-sweep-listener".to_string())
        .spawn(move || loop {
            match sub.recv_timeout(LISTENER_POLL) {
                Ok(env) => {
                    if env.aggregate_type() == STOCK_AGGREGATE_TYPE {
                        registry.on_stock_event(env.tenant_id());
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if registry.closed.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .map(|_| ())
}
