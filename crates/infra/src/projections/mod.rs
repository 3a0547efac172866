//! Projection implementations (read model builders).
//!
//! Projections consume committed events and build query-optimized read models.
//! They are rebuildable from the event store, tenant-isolated, and idempotent
//! under at-least-once delivery.

pub mod stock_levels;

pub use stock_levels::{StockLevel, StockLevelsProjection, StockProjectionError};
