//! # WorkItem Trait
//!
//! The `WorkItem` trait defines the interface for the opaque units of work
//! this core distributes: typically one individual of an optimization
//! population whose fitness evaluation is expensive enough to farm out.
//! The core never inspects an item's content — it only processes it, tracks
//! its status, and moves its serialized form across the wire.
//!
//! ## Example
//!
//! ```rust
//! use evobroker::work_item::{ProcessingStatus, SerializationMode, WorkItem};
//! use evobroker::error::{ExecutionError, Result};
//!
//! #[derive(Clone, Debug)]
//! struct Candidate {
//!     value: f64,
//!     fitness: Option<f64>,
//!     status: ProcessingStatus,
//! }
//!
//! impl WorkItem for Candidate {
//!     fn process(&mut self) -> Result<()> {
//!         self.fitness = Some(self.value * self.value);
//!         Ok(())
//!     }
//!
//!     fn status(&self) -> ProcessingStatus {
//!         self.status
//!     }
//!
//!     fn set_status(&mut self, status: ProcessingStatus) {
//!         self.status = status;
//!     }
//!
//!     fn serialize(&self, _mode: SerializationMode) -> Result<Vec<u8>> {
//!         Ok(format!("{}:{}", self.value, self.fitness.unwrap_or(f64::NAN)).into_bytes())
//!     }
//!
//!     fn deserialize(bytes: &[u8], _mode: SerializationMode) -> Result<Self> {
//!         let text = std::str::from_utf8(bytes)
//!             .map_err(|e| ExecutionError::Serialization(e.to_string()))?;
//!         let mut parts = text.splitn(2, ':');
//!         let value = parts
//!             .next()
//!             .and_then(|v| v.parse().ok())
//!             .ok_or_else(|| ExecutionError::Serialization("missing value".into()))?;
//!         let fitness = parts.next().and_then(|f| f.parse().ok());
//!         Ok(Self {
//!             value,
//!             fitness,
//!             status: ProcessingStatus::Unprocessed,
//!         })
//!     }
//! }
//! ```

use std::fmt::Debug;

use crate::error::{ExecutionError, Result};

/// Processing state of a work item across one distribution round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessingStatus {
    /// Not yet evaluated, or evaluation never returned.
    Unprocessed,
    /// Evaluation completed successfully.
    Processed,
    /// Evaluation ran but reported failure. Distinct from `Unprocessed`:
    /// the item did round-trip, its computation did not succeed.
    Error,
}

/// Encoding negotiated for a work item's wire representation.
///
/// The mode travels with every outbound payload so that client and server
/// always agree on how to decode what follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SerializationMode {
    /// Plain text encoding.
    Text,
    /// XML encoding.
    Xml,
    /// Compact binary encoding.
    Binary,
}

impl SerializationMode {
    /// Numeric wire tag for this mode.
    pub fn as_tag(self) -> u8 {
        match self {
            SerializationMode::Text => 0,
            SerializationMode::Xml => 1,
            SerializationMode::Binary => 2,
        }
    }

    /// Parses a numeric wire tag back into a mode.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(SerializationMode::Text),
            1 => Ok(SerializationMode::Xml),
            2 => Ok(SerializationMode::Binary),
            other => Err(ExecutionError::Protocol(format!(
                "Unknown serialization mode tag: {}",
                other
            ))),
        }
    }
}

/// Trait for the units of work distributed through the broker.
///
/// Implementors are exclusively owned by exactly one party at any instant:
/// the submitting population, a queue slot, or the consumer currently
/// executing `process`. Transfer through the core is always a move, never a
/// share, so no interior synchronization is required.
///
/// `Clone` is required so the executor can retain a copy of a submitted item
/// and restore it when the round trip is declared lost and the resubmission
/// policy is active.
pub trait WorkItem: Clone + Debug + Send + 'static {
    /// Performs the computation in place.
    ///
    /// An `Err` marks this evaluation as unsuccessful; the executing consumer
    /// records the outcome via [`WorkItem::set_status`] before returning the
    /// item. Implementations should not panic for ordinary evaluation
    /// failure.
    fn process(&mut self) -> Result<()>;

    /// Current processing status of this item.
    fn status(&self) -> ProcessingStatus;

    /// Records the processing status. Called by consumers after `process`
    /// and by the executor when accounting for items that never returned.
    fn set_status(&mut self, status: ProcessingStatus);

    /// Encodes this item into a byte string using the given mode.
    fn serialize(&self, mode: SerializationMode) -> Result<Vec<u8>>;

    /// Decodes an item previously encoded with [`WorkItem::serialize`] under
    /// the same mode. Round-tripping must preserve all evaluation-relevant
    /// content, including fitness metadata of already-processed items.
    fn deserialize(bytes: &[u8], mode: SerializationMode) -> Result<Self>
    where
        Self: Sized;
}
