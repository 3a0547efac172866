//! Application services over the event-sourced aggregates.
//!
//! - [`ledger::StockLedger`]: the only write path for stock quantity and cost
//! - [`purchasing::PurchaseOrderManager`]: purchase order lifecycle and receipts
//! - [`opname::OpnameReconciler`]: physical counts and their adjustments
//! - [`analytics::InventoryAnalytics`]: read-only reports

pub mod analytics;
pub mod ledger;
pub mod opname;
pub mod purchasing;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use stockledger_events::{EventBus, EventEnvelope, InMemoryEventBus};

use crate::alerts::StockAlertSink;
use crate::catalog::ProductCatalog;
use crate::command_dispatcher::CommandDispatcher;
use crate::config::InventoryConfig;
use crate::event_store::{EventStore, InMemoryEventStore};

pub use analytics::{DeadStockRow, InventoryAnalytics, LowStockRow, ValuationLine, ValuationReport};
pub use ledger::{LedgerAudit, MovementFilter, MovementPage, MovementRequest, ProductStockState, StockLedger};
pub use opname::{NewOpname, OpnamePatch, OpnameReconciler, OpnameView};
pub use purchasing::{
    NewPurchaseOrder, PurchaseOrderManager, PurchaseOrderPatch, PurchaseOrderView, ReceiptLineOutcome, ReceiptReport,
};

/// All services wired onto one store and one bus.
pub struct InventoryEngine<S, B> {
    pub ledger: Arc<StockLedger<S, B>>,
    pub purchasing: Arc<PurchaseOrderManager<S, B>>,
    pub opname: Arc<OpnameReconciler<S, B>>,
    pub analytics: Arc<InventoryAnalytics<S, B>>,
}

impl<S, B> Clone for InventoryEngine<S, B> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            purchasing: self.purchasing.clone(),
            opname: self.opname.clone(),
            analytics: self.analytics.clone(),
        }
    }
}

impl<S, B> InventoryEngine<S, B>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>> + Clone,
{
    pub fn new(
        store: S,
        bus: B,
        catalog: Arc<dyn ProductCatalog>,
        alerts: Arc<dyn StockAlertSink>,
        config: &InventoryConfig,
    ) -> Self {
        let dispatcher =
            || CommandDispatcher::new(store.clone(), bus.clone()).with_max_attempts(config.max_append_attempts);

        let ledger = Arc::new(StockLedger::new(dispatcher(), catalog, alerts));
        Self {
            purchasing: Arc::new(PurchaseOrderManager::new(dispatcher(), ledger.clone())),
            opname: Arc::new(OpnameReconciler::new(dispatcher(), ledger.clone())),
            analytics: Arc::new(InventoryAnalytics::new(ledger.clone(), config.dead_stock_window_days)),
            ledger,
        }
    }
}

pub type InMemoryInventoryEngine =
    InventoryEngine<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

impl InMemoryInventoryEngine {
    /// Engine on the in-memory store and bus (tests and the dev server).
    pub fn in_memory(
        catalog: Arc<dyn ProductCatalog>,
        alerts: Arc<dyn StockAlertSink>,
        config: &InventoryConfig,
    ) -> Self {
        Self::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            catalog,
            alerts,
            config,
        )
    }
}
