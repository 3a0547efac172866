//! Background stock sweep (periodic low-stock and dead-stock signals).

pub mod runner;

pub use runner::{StockSweepHandle, StockSweepRunner, StockSweepSource, SweepState, SweepSummary};
