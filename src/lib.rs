pub mod broker;
pub mod client;
pub mod consumer;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod queue;
pub mod seed;
pub mod work_item;

// Re-export commonly used types for convenience
pub use broker::{Broker, ConsumerId, PortId};
pub use client::{ClientOptions, NetworkClient};
pub use consumer::{Consumer, ConsumerState, LocalConsumer, NetworkConsumer};
pub use error::{ExecutionError, Result, ResultExt};
pub use executor::{ExecutionOptions, Executor};
pub use queue::BoundedBuffer;
pub use work_item::{ProcessingStatus, SerializationMode, WorkItem};
