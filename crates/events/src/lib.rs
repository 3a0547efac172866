//! Event vocabulary shared by the ledger, purchasing and opname streams.
//!
//! - [`Event`]: what a domain event must expose (type, schema version, time)
//! - [`EventEnvelope`]: tenant + stream metadata wrapped around a payload
//! - [`EventBus`]: post-commit fan-out to read models and signal consumers

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
