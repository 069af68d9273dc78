//! Durable queue boundary between the scanner and the consumer.

mod amqp;
mod memory;

pub use amqp::{AmqpConfig, AmqpQueue};
pub use memory::InMemoryQueue;
