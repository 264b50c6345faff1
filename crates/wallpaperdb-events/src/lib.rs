//! Event bus port.
//!
//! Upload announcements travel over a durable stream with at-least-once
//! delivery. The [`EventBus`] trait abstracts the transport; production uses
//! NATS JetStream, tests use the in-memory bus. Consumers are idempotent by
//! contract because redelivery can always happen.

pub mod consumer;
pub mod memory;
pub mod nats;
pub mod traits;

pub use consumer::{ConsumerRunner, EventConsumer, ReadModelConsumer};
pub use memory::MemoryEventBus;
pub use nats::NatsEventBus;
pub use traits::{Acker, BusError, BusResult, Delivery, EventBus, EventHeaders, EventSubscription};
