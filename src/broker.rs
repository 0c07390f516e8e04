//! # Broker
//!
//! The `Broker` is the rendezvous point between populations that submit work
//! items and consumers that execute them. It owns one [`Channel`] — a pair of
//! bounded handoff queues — per enrolled consumer, routes submissions to the
//! first consumer with a free slot (round-robin), and lets the executor
//! harvest processed items from every channel, matched by [`PortId`] rather
//! than arrival order.
//!
//! A broker is an explicitly constructed object shared as `Arc<Broker<W>>`
//! between the driver, populations and consumers. There is no process-wide
//! singleton: tests routinely run several brokers side by side.
//!
//! ## Example
//!
//! ```rust
//! use evobroker::broker::Broker;
//! use evobroker::work_item::{ProcessingStatus, SerializationMode, WorkItem};
//! # use evobroker::error::Result;
//! # #[derive(Clone, Debug)]
//! # struct Item;
//! # impl WorkItem for Item {
//! #     fn process(&mut self) -> Result<()> { Ok(()) }
//! #     fn status(&self) -> ProcessingStatus { ProcessingStatus::Unprocessed }
//! #     fn set_status(&mut self, _: ProcessingStatus) {}
//! #     fn serialize(&self, _: SerializationMode) -> Result<Vec<u8>> { Ok(vec![]) }
//! #     fn deserialize(_: &[u8], _: SerializationMode) -> Result<Self> { Ok(Item) }
//! # }
//!
//! let broker: Broker<Item> = Broker::new();
//! let consumer = broker.enrol(4);
//! assert_eq!(broker.consumer_count(), 1);
//! broker.signoff(consumer).unwrap();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{ExecutionError, Result};
use crate::queue::BoundedBuffer;
use crate::seed::{EntropySeed, SeedSource};
use crate::work_item::WorkItem;

/// Correlates a submitted work item with its eventual return.
///
/// Port ids are allocated by the broker, monotonically increasing, and unique
/// for the lifetime of an in-flight item. The executor reconciles returned
/// items by port id alone; arrival order carries no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortId(u64);

impl PortId {
    /// Rebuilds a port id from its numeric value, e.g. after wire decoding.
    pub fn from_value(value: u64) -> Self {
        Self(value)
    }

    /// The numeric value, as carried in wire headers.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of an enrolled consumer, assigned by the broker.
///
/// Because the broker assigns identities itself, two enrolments can never
/// collide: each `enrol` call creates an independent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The queue pair allocated to one enrolled consumer: raw items travelling
/// towards the consumer and processed items travelling back.
#[derive(Debug)]
struct Channel<W> {
    raw: BoundedBuffer<(PortId, W)>,
    processed: BoundedBuffer<(PortId, W)>,
}

impl<W> Channel<W> {
    fn new(capacity: usize) -> Self {
        Self {
            raw: BoundedBuffer::new(capacity),
            processed: BoundedBuffer::new(capacity),
        }
    }
}

/// Error returned by the broker's submission paths.
///
/// Ownership of the rejected item travels back inside the variant, so a
/// caller's retry loop never loses it.
#[derive(Debug)]
pub enum PutError<W> {
    /// Every eligible raw queue stayed full for the whole budget.
    Timeout(W),
    /// No consumer is currently enrolled.
    NoConsumers(W),
    /// The targeted channel vanished because its consumer signed off.
    /// Treat like a timeout: resubmit.
    BufferNotPresent(ConsumerId, W),
}

impl<W> PutError<W> {
    /// Recovers the item that could not be submitted.
    pub fn into_item(self) -> W {
        match self {
            PutError::Timeout(item)
            | PutError::NoConsumers(item)
            | PutError::BufferNotPresent(_, item) => item,
        }
    }

    /// The equivalent [`ExecutionError`], for callers that give up on the item.
    pub fn to_error(&self) -> ExecutionError {
        match self {
            PutError::Timeout(_) => {
                ExecutionError::Timeout("all raw queues stayed full".to_string())
            }
            PutError::NoConsumers(_) => ExecutionError::NoConsumers,
            PutError::BufferNotPresent(id, _) => ExecutionError::BufferNotPresent(id.0),
        }
    }
}

/// Registry and router between work-item submitters and consumers.
pub struct Broker<W: WorkItem> {
    channels: Mutex<HashMap<ConsumerId, Arc<Channel<W>>>>,
    next_consumer: AtomicU64,
    next_port: AtomicU64,
    put_cursor: AtomicUsize,
    collect_cursor: AtomicUsize,
    seeds: Box<dyn SeedSource>,
}

impl<W: WorkItem> fmt::Debug for Broker<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("consumers", &self.consumer_count())
            .finish()
    }
}

impl<W: WorkItem> Default for Broker<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: WorkItem> Broker<W> {
    /// Creates a broker with entropy-based seed distribution.
    pub fn new() -> Self {
        Self::with_seed_source(Box::new(EntropySeed))
    }

    /// Creates a broker with an explicit seed source, e.g. a
    /// [`crate::seed::SequentialSeed`] for reproducible runs.
    pub fn with_seed_source(seeds: Box<dyn SeedSource>) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_consumer: AtomicU64::new(0),
            next_port: AtomicU64::new(0),
            put_cursor: AtomicUsize::new(0),
            collect_cursor: AtomicUsize::new(0),
            seeds,
        }
    }

    /// Registers a new consumer, allocating it a fresh channel whose two
    /// queues each hold up to `capacity` items. The capacity is fixed for
    /// the lifetime of the channel.
    pub fn enrol(&self, capacity: usize) -> ConsumerId {
        let id = ConsumerId(self.next_consumer.fetch_add(1, Ordering::Relaxed));
        let channel = Arc::new(Channel::new(capacity));
        self.channels.lock().unwrap().insert(id, channel);
        debug!(consumer = %id, capacity, "Consumer enrolled");
        id
    }

    /// Unenrols a consumer and tears down its channel.
    ///
    /// Raw items still queued in the channel are lost; the submitting
    /// executor observes this as an expired wait budget and the affected
    /// positions stay unprocessed.
    pub fn signoff(&self, id: ConsumerId) -> Result<()> {
        match self.channels.lock().unwrap().remove(&id) {
            Some(channel) => {
                let orphaned = channel.raw.len();
                if orphaned > 0 {
                    debug!(consumer = %id, orphaned, "Signoff dropped queued raw items");
                }
                debug!(consumer = %id, "Consumer signed off");
                Ok(())
            }
            None => Err(ExecutionError::BufferNotPresent(id.0)),
        }
    }

    /// Number of currently enrolled consumers.
    pub fn consumer_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    /// Allocates a fresh port id for one submission.
    pub fn next_port(&self) -> PortId {
        PortId(self.next_port.fetch_add(1, Ordering::Relaxed))
    }

    /// Hands out the next client seed from the injected source.
    pub fn seed(&self) -> u64 {
        self.seeds.next_seed()
    }

    /// Snapshot of enrolled channels in stable id order.
    fn channel_snapshot(&self) -> Vec<(ConsumerId, Arc<Channel<W>>)> {
        let channels = self.channels.lock().unwrap();
        let mut snapshot: Vec<_> = channels
            .iter()
            .map(|(id, ch)| (*id, Arc::clone(ch)))
            .collect();
        snapshot.sort_by_key(|(id, _)| *id);
        snapshot
    }

    /// Submits a raw item tagged with `port` to some enrolled consumer.
    ///
    /// Consumers are tried round-robin, starting at a rotating cursor so one
    /// fast channel does not shadow the others. If every raw queue stays full
    /// the call retries until `timeout` and hands the item back.
    pub fn put(
        &self,
        port: PortId,
        item: W,
        timeout: Duration,
    ) -> std::result::Result<(), PutError<W>> {
        let deadline = Instant::now() + timeout;
        let mut entry = (port, item);
        loop {
            let snapshot = self.channel_snapshot();
            if snapshot.is_empty() {
                return Err(PutError::NoConsumers(entry.1));
            }
            let start = self.put_cursor.fetch_add(1, Ordering::Relaxed) % snapshot.len();

            // One quick pass over all channels before spending any of the
            // budget blocked on a single full queue.
            for offset in 0..snapshot.len() {
                let (_, channel) = &snapshot[(start + offset) % snapshot.len()];
                match channel.raw.push_front_timeout(entry, Duration::ZERO) {
                    Ok(()) => return Ok(()),
                    Err(rejected) => entry = rejected.into_inner(),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PutError::Timeout(entry.1));
            }
            let slice = ((deadline - now) / snapshot.len() as u32).min(Duration::from_millis(20));
            let (_, channel) = &snapshot[start];
            match channel.raw.push_front_timeout(entry, slice) {
                Ok(()) => return Ok(()),
                Err(rejected) => entry = rejected.into_inner(),
            }
        }
    }

    /// Pulls the next raw item assigned to consumer `id`.
    ///
    /// Returns [`ExecutionError::Timeout`] when no work arrived within the
    /// budget (the idle-poll state of every worker loop) and
    /// [`ExecutionError::BufferNotPresent`] when the channel has been torn
    /// down, which a worker treats as its cue to stop.
    pub fn get(&self, id: ConsumerId, timeout: Duration) -> Result<(PortId, W)> {
        let channel = self
            .channels
            .lock()
            .unwrap()
            .get(&id)
            .map(Arc::clone)
            .ok_or(ExecutionError::BufferNotPresent(id.0))?;
        channel
            .raw
            .pop_back_timeout(timeout)
            .map_err(|_| ExecutionError::Timeout(format!("no raw work for consumer {}", id)))
    }

    /// Pushes a processed item back into consumer `id`'s processed queue,
    /// tagged with its original port id, for the executor to harvest.
    pub fn put_processed(
        &self,
        id: ConsumerId,
        port: PortId,
        item: W,
        timeout: Duration,
    ) -> std::result::Result<(), PutError<W>> {
        let channel = match self.channels.lock().unwrap().get(&id).map(Arc::clone) {
            Some(channel) => channel,
            None => return Err(PutError::BufferNotPresent(id, item)),
        };
        channel
            .processed
            .push_front_timeout((port, item), timeout)
            .map_err(|rejected| PutError::Timeout(rejected.into_inner().1))
    }

    /// Polls every enrolled channel's processed queue for one returned item.
    ///
    /// Channels are scanned from a rotating start index for fairness. Returns
    /// `None` once `timeout` expires with nothing harvested, which is an
    /// expected signal, not a fault.
    pub fn try_collect(&self, timeout: Duration) -> Option<(PortId, W)> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.channel_snapshot();
            if !snapshot.is_empty() {
                let start = self.collect_cursor.fetch_add(1, Ordering::Relaxed) % snapshot.len();
                for offset in 0..snapshot.len() {
                    let (_, channel) = &snapshot[(start + offset) % snapshot.len()];
                    if let Ok(found) = channel.processed.pop_back_timeout(Duration::ZERO) {
                        return Some(found);
                    }
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}
