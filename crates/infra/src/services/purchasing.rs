//! Purchase order workflow and the receive-goods flow into the ledger.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use stockledger_core::{AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{MovementType, ProductId, ReferenceType};
use stockledger_purchasing::{
    CancelPurchaseOrder, CreatePurchaseOrder, LineInput, PURCHASE_ORDER_AGGREGATE_TYPE, PurchaseOrder,
    PurchaseOrderCommand, PurchaseOrderId, PurchaseOrderLine, PurchaseOrderStatus, ReceiptLine, RecordReceipt,
    SubmitPurchaseOrder, UpdatePurchaseOrder,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::locks::KeyedLocks;
use crate::read_model::{InMemoryTenantStore, TenantStore};

use super::ledger::{MovementRequest, StockLedger};

/// Input for [`PurchaseOrderManager::create`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_name: String,
    pub po_date: NaiveDate,
    pub items: Vec<LineInput>,
    pub notes: Option<String>,
    /// Create directly as `PENDING`.
    #[serde(default)]
    pub submit: bool,
}

/// Partial update; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PurchaseOrderPatch {
    pub supplier_name: Option<String>,
    pub po_date: Option<NaiveDate>,
    /// Absent keeps the notes, `null` clears them.
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
    pub items: Option<Vec<LineInput>>,
}

/// Maps a field that is present in the payload (even as `null`) to `Some`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOrderView {
    pub po_id: PurchaseOrderId,
    pub supplier_name: String,
    pub po_date: Option<NaiveDate>,
    pub status: PurchaseOrderStatus,
    pub notes: Option<String>,
    pub items: Vec<PurchaseOrderLine>,
    pub total_cost: Decimal,
    pub created_by: Option<UserId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl From<&PurchaseOrder> for PurchaseOrderView {
    fn from(po: &PurchaseOrder) -> Self {
        Self {
            po_id: po.id_typed(),
            supplier_name: po.supplier_name().to_string(),
            po_date: po.po_date(),
            status: po.status(),
            notes: po.notes().map(str::to_string),
            items: po.items().to_vec(),
            total_cost: po.items().iter().fold(Decimal::ZERO, |total, l| {
                total.saturating_add(l.cost_per_unit.saturating_mul(Decimal::from(l.quantity_ordered)))
            }),
            created_by: po.created_by(),
            created_at: po.created_at(),
            updated_at: po.updated_at(),
            version: po.version(),
        }
    }
}

/// Per-line result of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReceiptLineOutcome {
    Received {
        product_id: ProductId,
        quantity: i64,
        movement_id: u64,
        resulting_on_hand_qty: i64,
    },
    Failed {
        product_id: ProductId,
        quantity: i64,
        error: String,
    },
}

impl ReceiptLineOutcome {
    pub fn is_received(&self) -> bool {
        matches!(self, ReceiptLineOutcome::Received { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptReport {
    pub po_id: PurchaseOrderId,
    pub lines: Vec<ReceiptLineOutcome>,
    /// Order status after the receipt.
    pub status: PurchaseOrderStatus,
}

/// Purchase order lifecycle service.
///
/// Mutations on one order are serialized by a per-order lock, so two
/// concurrent receipts cannot both pass the remaining-quantity check.
pub struct PurchaseOrderManager<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    ledger: Arc<StockLedger<S, B>>,
    locks: KeyedLocks<(TenantId, PurchaseOrderId)>,
    views: InMemoryTenantStore<PurchaseOrderId, PurchaseOrderView>,
}

impl<S, B> PurchaseOrderManager<S, B>
where
    S: crate::event_store::EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, ledger: Arc<StockLedger<S, B>>) -> Self {
        Self {
            dispatcher,
            ledger,
            locks: KeyedLocks::new(),
            views: InMemoryTenantStore::new(),
        }
    }

    pub fn create(
        &self,
        tenant_id: TenantId,
        input: NewPurchaseOrder,
        actor: UserId,
    ) -> Result<PurchaseOrderView, DispatchError> {
        let po_id = PurchaseOrderId::new(AggregateId::new());
        let command = PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
            tenant_id,
            order_id: po_id,
            supplier_name: input.supplier_name,
            po_date: input.po_date,
            items: input.items,
            notes: input.notes,
            submit: input.submit,
            actor,
            occurred_at: Utc::now(),
        });

        let view = self.locks.with_lock(&(tenant_id, po_id), || self.execute(tenant_id, po_id, command))?;
        info!(tenant = %tenant_id, po = %po_id, status = view.status.as_str(), "purchase order created");
        Ok(view)
    }

    pub fn update(
        &self,
        tenant_id: TenantId,
        po_id: PurchaseOrderId,
        patch: PurchaseOrderPatch,
    ) -> Result<PurchaseOrderView, DispatchError> {
        let command = PurchaseOrderCommand::UpdatePurchaseOrder(UpdatePurchaseOrder {
            tenant_id,
            order_id: po_id,
            supplier_name: patch.supplier_name,
            po_date: patch.po_date,
            notes: patch.notes,
            items: patch.items,
            occurred_at: Utc::now(),
        });
        self.locks.with_lock(&(tenant_id, po_id), || self.execute(tenant_id, po_id, command))
    }

    pub fn submit(&self, tenant_id: TenantId, po_id: PurchaseOrderId) -> Result<PurchaseOrderView, DispatchError> {
        let command = PurchaseOrderCommand::SubmitPurchaseOrder(SubmitPurchaseOrder {
            tenant_id,
            order_id: po_id,
            occurred_at: Utc::now(),
        });
        self.locks.with_lock(&(tenant_id, po_id), || self.execute(tenant_id, po_id, command))
    }

    pub fn cancel(
        &self,
        tenant_id: TenantId,
        po_id: PurchaseOrderId,
        reason: Option<String>,
    ) -> Result<PurchaseOrderView, DispatchError> {
        let command = PurchaseOrderCommand::CancelPurchaseOrder(CancelPurchaseOrder {
            tenant_id,
            order_id: po_id,
            reason,
            occurred_at: Utc::now(),
        });
        let view = self.locks.with_lock(&(tenant_id, po_id), || self.execute(tenant_id, po_id, command))?;
        info!(tenant = %tenant_id, po = %po_id, "purchase order cancelled");
        Ok(view)
    }

    /// Receive goods against a `PENDING` order.
    ///
    /// The whole request is validated first; any invalid line rejects it with
    /// nothing recorded. Each valid line then becomes an `IN` movement at the
    /// order's unit cost. A line whose ledger append fails is reported and left
    /// unreceived while the other lines still go through.
    ///
    /// Stock already posted under this order's reference but missing from the
    /// order (a receipt that failed to record) is picked up before the new
    /// request is validated.
    pub fn receive(
        &self,
        tenant_id: TenantId,
        po_id: PurchaseOrderId,
        lines: Vec<ReceiptLine>,
        actor: UserId,
    ) -> Result<ReceiptReport, DispatchError> {
        self.locks.with_lock(&(tenant_id, po_id), || {
            let po = self.reconcile_posted_receipts(tenant_id, self.load(tenant_id, po_id)?)?;
            po.validate_receipt(tenant_id, &lines)?;

            let mut outcomes = Vec::with_capacity(lines.len());
            let mut recorded = Vec::new();
            for line in &lines {
                let cost = po.line(line.product_id).map(|l| l.cost_per_unit);
                let request = MovementRequest {
                    product_id: line.product_id,
                    movement_type: MovementType::In,
                    direction: None,
                    quantity: line.quantity,
                    cost_per_unit: cost,
                    reference_type: ReferenceType::Purchase,
                    reference_id: po_id.to_string(),
                    actor,
                    note: Some(format!("receipt for purchase order {po_id}")),
                    occurred_at: None,
                };

                match self.ledger.append_movement(tenant_id, request) {
                    Ok(movement) => {
                        recorded.push(*line);
                        outcomes.push(ReceiptLineOutcome::Received {
                            product_id: line.product_id,
                            quantity: line.quantity,
                            movement_id: movement.movement_id,
                            resulting_on_hand_qty: movement.resulting_on_hand_qty,
                        });
                    }
                    Err(e) => {
                        warn!(tenant = %tenant_id, po = %po_id, product = %line.product_id, error = %e, "receipt line failed");
                        outcomes.push(ReceiptLineOutcome::Failed {
                            product_id: line.product_id,
                            quantity: line.quantity,
                            error: e.to_string(),
                        });
                    }
                }
            }

            let view = if recorded.is_empty() {
                PurchaseOrderView::from(&po)
            } else {
                let command = PurchaseOrderCommand::RecordReceipt(RecordReceipt {
                    tenant_id,
                    order_id: po_id,
                    lines: recorded,
                    occurred_at: Utc::now(),
                });
                self.execute(tenant_id, po_id, command).inspect_err(|e| {
                    error!(tenant = %tenant_id, po = %po_id, error = %e, "stock posted but receipt not recorded on order");
                })?
            };

            info!(
                tenant = %tenant_id,
                po = %po_id,
                received = outcomes.iter().filter(|o| o.is_received()).count(),
                failed = outcomes.iter().filter(|o| !o.is_received()).count(),
                status = view.status.as_str(),
                "purchase order receipt processed"
            );

            Ok(ReceiptReport {
                po_id,
                lines: outcomes,
                status: view.status,
            })
        })
    }

    /// Record on the order any purchase stock the ledger holds for it beyond
    /// `quantity_received`. Caller holds the order lock.
    fn reconcile_posted_receipts(
        &self,
        tenant_id: TenantId,
        po: PurchaseOrder,
    ) -> Result<PurchaseOrder, DispatchError> {
        if po.status() != PurchaseOrderStatus::Pending {
            return Ok(po);
        }

        let po_id = po.id_typed();
        let reference_id = po_id.to_string();
        let missing: Vec<ReceiptLine> = po
            .items()
            .iter()
            .filter_map(|line| {
                let posted = self
                    .ledger
                    .referenced_quantity(tenant_id, line.product_id, ReferenceType::Purchase, &reference_id)
                    .min(line.quantity_ordered);
                let quantity = posted - line.quantity_received;
                (quantity > 0).then_some(ReceiptLine {
                    product_id: line.product_id,
                    quantity,
                })
            })
            .collect();

        if missing.is_empty() {
            return Ok(po);
        }

        warn!(tenant = %tenant_id, po = %po_id, lines = missing.len(), "recording previously posted receipt");
        let command = PurchaseOrderCommand::RecordReceipt(RecordReceipt {
            tenant_id,
            order_id: po_id,
            lines: missing,
            occurred_at: Utc::now(),
        });
        self.execute(tenant_id, po_id, command)?;
        self.load(tenant_id, po_id)
    }

    pub fn get(&self, tenant_id: TenantId, po_id: PurchaseOrderId) -> Result<PurchaseOrderView, DispatchError> {
        self.load(tenant_id, po_id).map(|po| PurchaseOrderView::from(&po))
    }

    /// All orders of the tenant, newest first, optionally filtered by status.
    pub fn list(&self, tenant_id: TenantId, status: Option<PurchaseOrderStatus>) -> Vec<PurchaseOrderView> {
        let mut views: Vec<_> = self
            .views
            .list(tenant_id)
            .into_iter()
            .filter(|v| status.is_none_or(|s| v.status == s))
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.po_id.cmp(&b.po_id)));
        views
    }

    fn load(&self, tenant_id: TenantId, po_id: PurchaseOrderId) -> Result<PurchaseOrder, DispatchError> {
        self.dispatcher
            .load(tenant_id, po_id.0, |_, id| PurchaseOrder::empty(PurchaseOrderId::new(id)))?
            .ok_or_else(|| DomainError::not_found().into())
    }

    fn execute(
        &self,
        tenant_id: TenantId,
        po_id: PurchaseOrderId,
        command: PurchaseOrderCommand,
    ) -> Result<PurchaseOrderView, DispatchError> {
        self.dispatcher.dispatch(
            tenant_id,
            po_id.0,
            PURCHASE_ORDER_AGGREGATE_TYPE,
            command,
            |_, id| PurchaseOrder::empty(PurchaseOrderId::new(id)),
        )?;

        let view = PurchaseOrderView::from(&self.load(tenant_id, po_id)?);
        self.views.upsert(tenant_id, po_id, view.clone());
        Ok(view)
    }
}
