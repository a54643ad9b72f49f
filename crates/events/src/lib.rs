//! `stockroom-events`: domain event mechanics.
//!
//! Orders and invoices record what happened to them as typed events. Committed
//! events are wrapped in an [`EventEnvelope`] and fanned out over an
//! [`EventBus`] to best-effort consumers (staff/customer notifications).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
