//! Infrastructure layer: event store, dispatch pipeline, projections and the
//! inventory application services.

pub mod alerts;
pub mod catalog;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod locks;
pub mod projections;
pub mod read_model;
pub mod services;
pub mod sweep;

mod integration_tests;
