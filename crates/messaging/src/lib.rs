//! Asynchronous dispatch pipeline: publish → route → consume → retry →
//! fault-report → dead-letter.
//!
//! Consumers bind to named queues through a transport-agnostic [`Topology`];
//! the RabbitMQ and in-process variants expose the identical routing
//! contract, so consumer code never knows which broker carries it.

pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod memory;
pub mod rabbit;
pub mod retry;
pub mod topology;

pub use consumer::{Consumer, ConsumeError, ErasedConsumer};
pub use dispatch::{Completion, Disposition, complete, dispatch};
pub use error::MessagingError;
pub use memory::MemoryTopology;
pub use rabbit::RabbitTopology;
pub use retry::{ErrorFilter, RetryPolicy, next_delay};
pub use topology::{EventBus, QueueDefinition, Topology, publish};
