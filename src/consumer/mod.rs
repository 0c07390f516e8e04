//! # Consumers
//!
//! A consumer is a producer/consumer execution engine: it pulls raw work
//! items from its broker channel, executes them, and pushes the results back.
//! The crate ships a closed set of two concrete consumers behind one small
//! seam: [`LocalConsumer`] runs a thread pool in-process,
//! [`NetworkConsumer`] exposes a TCP endpoint served by remote
//! [`crate::client::NetworkClient`] processes.

pub mod local;
pub mod network;

use crate::broker::ConsumerId;
use crate::error::Result;

/// Lifecycle states of a consumer.
///
/// `Draining` covers the window where the stop flag is set but worker
/// threads may still be finishing their current item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Not enrolled, no threads running.
    Stopped,
    /// Enrolled and pulling work.
    Running,
    /// Stop requested, in-flight items finishing, no new items pulled.
    Draining,
}

/// Common lifecycle seam over the concrete consumer variants.
///
/// Drivers that manage a heterogeneous set of consumers hold them as
/// `Box<dyn Consumer>` and dispatch through this interface.
pub trait Consumer {
    /// Enrols with the broker and starts pulling work asynchronously.
    /// Valid only from the `Stopped` state.
    fn start(&mut self) -> Result<()>;

    /// Cooperative shutdown: sets the stop flag, waits for in-flight items
    /// to finish, joins all threads and signs off the broker channel.
    fn shutdown(&mut self) -> Result<()>;

    /// Broker identity while enrolled, `None` when stopped.
    fn id(&self) -> Option<ConsumerId>;

    /// Current lifecycle state.
    fn state(&self) -> ConsumerState;
}

pub use local::{LocalConsumer, LocalConsumerOptions};
pub use network::{NetworkConsumer, NetworkOptions};
