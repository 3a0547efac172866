//! Stock opname (physical count) domain module.
//!
//! An opname session records a counted quantity against the system quantity
//! captured when the count was taken. Processing it is a one-way transition
//! that the infrastructure layer pairs with at most one `ADJUSTMENT` movement.

pub mod session;

pub use session::{
    CreateOpname, MarkProcessed, OPNAME_AGGREGATE_TYPE, OpnameCommand, OpnameCreated, OpnameEvent,
    OpnameId, OpnameOutcome, OpnameProcessed, OpnameUpdated, StockOpname, UpdateOpname,
};
