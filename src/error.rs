//! # Error Types
//!
//! This module defines the error types used throughout the execution core.
//! Expected, recoverable conditions (a timed-out broker operation, a missing
//! channel) are ordinary variants that callers match on and retry; queue-level
//! push/pop timeouts are not represented here at all — they are value types in
//! [`crate::queue`] because they occur on every idle poll.
//!
//! ## Examples
//!
//! Using the `Result` type:
//!
//! ```rust
//! use evobroker::error::{ExecutionError, Result};
//!
//! fn some_operation() -> Result<()> {
//!     // Operation implementation
//!     Ok(())
//! }
//! ```
//!
//! Using the `ResultExt` trait to add context to foreign errors:
//!
//! ```rust
//! use evobroker::error::ResultExt;
//! use std::net::TcpStream;
//!
//! fn connect(addr: &str) -> evobroker::error::Result<TcpStream> {
//!     TcpStream::connect(addr).context("Failed to reach evaluation server")
//! }
//! ```

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Represents errors that can occur while distributing and collecting work items.
///
/// The taxonomy distinguishes expected signals (`Timeout`, `BufferNotPresent`)
/// from per-exchange protocol faults and from conditions that are fatal to a
/// single client process (`ConnectionAttemptsExceeded`). None of these are
/// fatal to the broker or to the server side.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// A broker `put`, `get` or collection cycle exceeded its time budget.
    /// Expected under load; callers retry with their own backoff policy.
    #[error("Broker operation timed out: {0}")]
    Timeout(String),

    /// A `put` found no enrolled consumer to route to.
    #[error("No consumers are enrolled with the broker")]
    NoConsumers,

    /// A `get` or return-path `put` targeted a channel whose consumer has
    /// signed off. Callers treat this exactly like a timeout: the item may
    /// be lost and must be resubmitted.
    #[error("Channel not present: consumer {0} is not enrolled")]
    BufferNotPresent(u64),

    /// A malformed fixed-width header or an unparseable size/id field.
    /// Aborts the one exchange it occurred on.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A work item could not be encoded or decoded for transport.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The configured maximum number of TCP connection attempts was reached.
    /// Fatal to the client process, never to the server.
    #[error("Connection attempts exceeded: {0} failed attempts to {1}")]
    ConnectionAttemptsExceeded(u32, String),

    /// A work item's own `process()` call reported failure.
    #[error("Processing error: {0}")]
    Processing(String),

    /// An invalid configuration was provided.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error that occurs when an I/O operation fails.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic error with a custom message.
    #[error("{0}")]
    Other(String),
}

/// A specialized Result type for work-distribution operations.
///
/// This type is a convenience wrapper around `std::result::Result` with the
/// error type fixed to `ExecutionError`.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Extension trait for Result to add context to errors.
///
/// Converts any foreign error into an `ExecutionError::Other` carrying the
/// supplied context string alongside the original message.
pub trait ResultExt<T, E> {
    /// Adds context to an error.
    ///
    /// ## Arguments
    ///
    /// * `context` - A string providing context for the error.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| ExecutionError::Other(format!("{}: {}", context, e)))
    }
}

impl ExecutionError {
    /// Returns true for conditions a caller should answer with retry/backoff
    /// rather than propagation: timeouts and channels that vanished mid-call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::Timeout(_)
                | ExecutionError::BufferNotPresent(_)
                | ExecutionError::NoConsumers
        )
    }
}
