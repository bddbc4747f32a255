//! Event contracts shared by the aggregates and the infra layer.
//!
//! Order status changes and inventory counter deltas are recorded as events;
//! after they are stored they are published as [`EventEnvelope`]s so that
//! downstream document builders (acknowledgment, confirmation, invoice) can
//! react to them.

pub mod bus;
pub mod envelope;
pub mod event;

pub use bus::{BusError, EventBus, InMemoryEventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
