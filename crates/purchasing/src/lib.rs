//! Purchasing domain module (Purchase Orders, event-sourced).
//!
//! Business rules for supplier orders and their receiving lifecycle,
//! implemented as deterministic domain logic (no IO, no HTTP, no storage).
//! Stock effects of a receipt are posted to the ledger by the infrastructure
//! layer; this crate only decides whether a receipt is allowed.

pub mod order;

pub use order::{
    CancelPurchaseOrder, CreatePurchaseOrder, GoodsReceived, LineInput, PurchaseOrder,
    PurchaseOrderCancelled, PurchaseOrderCommand, PurchaseOrderCreated, PurchaseOrderEvent,
    PurchaseOrderId, PurchaseOrderLine, PurchaseOrderReceived, PurchaseOrderStatus,
    PurchaseOrderSubmitted, PurchaseOrderUpdated, PURCHASE_ORDER_AGGREGATE_TYPE, ReceiptLine,
    RecordReceipt, SubmitPurchaseOrder, UpdatePurchaseOrder,
};
