use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use stockledger_core::UserId;
use stockledger_infra::command_dispatcher::DispatchError;
use stockledger_infra::services::MovementRequest;
use stockledger_inventory::{MovementType, ProductId, ReferenceType, StockDirection};
use stockledger_opname::{OpnameId, OpnameOutcome};
use stockledger_purchasing::{PurchaseOrderStatus, ReceiptLine};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct AppendMovementRequest {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub direction: Option<StockDirection>,
    pub quantity: i64,
    pub cost_per_unit: Option<Decimal>,
    pub reference_type: ReferenceType,
    pub reference_id: String,
    pub note: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl AppendMovementRequest {
    pub fn into_request(self, actor: UserId) -> MovementRequest {
        MovementRequest {
            product_id: self.product_id,
            movement_type: self.movement_type,
            direction: self.direction,
            quantity: self.quantity,
            cost_per_unit: self.cost_per_unit,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            actor,
            note: self.note,
            occurred_at: self.occurred_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpsertCatalogProductRequest {
    pub min_stock_threshold: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveGoodsRequest {
    pub lines: Vec<ReceiptLine>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelPurchaseOrderRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListPurchaseOrdersQuery {
    pub status: Option<PurchaseOrderStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListOpnamesQuery {
    pub processed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct BulkProcessRequest {
    pub opname_ids: Vec<OpnameId>,
}

#[derive(Debug, Deserialize)]
pub struct DeadStockQuery {
    pub window_days: Option<u32>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn bulk_result_to_json(opname_id: OpnameId, result: Result<OpnameOutcome, DispatchError>) -> serde_json::Value {
    match result {
        Ok(outcome) => serde_json::json!({
            "opname_id": opname_id,
            "status": "processed",
            "outcome": outcome,
        }),
        Err(e) => serde_json::json!({
            "opname_id": opname_id,
            "status": "failed",
            "error": e.to_string(),
        }),
    }
}
