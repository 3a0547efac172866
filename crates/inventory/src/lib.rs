//! Stock ledger domain module (event-sourced).
//!
//! One `ProductStock` aggregate per product owns the append-only movement
//! stream. Its single command, [`RecordMovement`], is the only way on-hand
//! quantity and weighted-average cost ever change. Pure domain logic: no IO,
//! no locking, no storage.

pub mod movement;
pub mod stock;
pub mod valuation;

pub use movement::{MovementType, ProductId, ReferenceType, StockDirection, StockMovement};
pub use stock::{
    MovementRecorded, ProductStock, RecordMovement, STOCK_AGGREGATE_TYPE, StockCommand, StockEvent,
};
pub use valuation::{
    StockPosition, checked_stock_value, replay_position, stock_value, weighted_average_cost,
};
