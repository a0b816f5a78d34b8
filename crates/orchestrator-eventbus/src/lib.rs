//! In-process fanout of persisted lifecycle events.

pub mod bus;
pub mod envelope;

pub use bus::{
    EventBusConfig, EventBusSnapshot, LifecycleEventBus, DEFAULT_GLOBAL_BUFFER_CAPACITY,
    DEFAULT_SESSION_BUFFER_CAPACITY,
};
pub use envelope::EventEnvelope;
