//! Event mechanics shared by the domain and infrastructure layers.
//!
//! - [`Event`]: typed, versioned facts
//! - [`EventEnvelope`]: the unit handed to transports (id + SKU partition key + payload)
//! - [`EventBus`]: in-process pub/sub used by tests and the in-memory transport

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod partition;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use partition::PartitionKeyed;
