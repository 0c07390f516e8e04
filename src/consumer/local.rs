//! # Local Consumer
//!
//! The `LocalConsumer` executes work items on a pool of in-process worker
//! threads. Each worker loops over a timed broker `get` — the timeout is the
//! idle-poll state, not a fault — processes the item, and retries the return
//! `put` until it lands or shutdown is requested. Shutdown is cooperative:
//! the stop flag is observed within one get-timeout interval and never
//! interrupts an in-flight `process` call.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use evobroker::broker::Broker;
//! use evobroker::consumer::{Consumer, LocalConsumer, LocalConsumerOptions};
//! # use evobroker::error::Result;
//! # use evobroker::work_item::{ProcessingStatus, SerializationMode, WorkItem};
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
//! let broker: Arc<Broker<Item>> = Arc::new(Broker::new());
//! let options = LocalConsumerOptions::builder().threads(2).build();
//! let mut consumer = LocalConsumer::new(Arc::clone(&broker), options);
//! consumer.start().unwrap();
//! // ... submit and collect work through the broker ...
//! consumer.shutdown().unwrap();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Consumer, ConsumerState};
use crate::broker::{Broker, ConsumerId, PutError};
use crate::error::{ExecutionError, Result};
use crate::work_item::{ProcessingStatus, WorkItem};

/// Configuration for a [`LocalConsumer`].
#[derive(Debug, Clone)]
pub struct LocalConsumerOptions {
    threads: usize,
    get_timeout: Duration,
    put_timeout: Duration,
    capacity_per_thread: usize,
}

impl LocalConsumerOptions {
    /// Returns a builder for fluent configuration.
    pub fn builder() -> LocalConsumerOptionsBuilder {
        LocalConsumerOptionsBuilder::default()
    }

    /// Configured thread count; 0 means hardware concurrency.
    pub fn get_threads(&self) -> usize {
        self.threads
    }

    /// The idle-poll interval of each worker's broker `get`.
    pub fn get_get_timeout(&self) -> Duration {
        self.get_timeout
    }

    /// Budget of one return-path `put` attempt.
    pub fn get_put_timeout(&self) -> Duration {
        self.put_timeout
    }

    /// Channel slots allocated per worker thread at enrolment.
    pub fn get_capacity_per_thread(&self) -> usize {
        self.capacity_per_thread
    }
}

impl Default for LocalConsumerOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            get_timeout: Duration::from_millis(100),
            put_timeout: Duration::from_millis(100),
            capacity_per_thread: 2,
        }
    }
}

/// Builder for [`LocalConsumerOptions`].
#[derive(Debug, Clone, Default)]
pub struct LocalConsumerOptionsBuilder {
    threads: Option<usize>,
    get_timeout: Option<Duration>,
    put_timeout: Option<Duration>,
    capacity_per_thread: Option<usize>,
}

impl LocalConsumerOptionsBuilder {
    /// Sets the worker thread count. 0 selects hardware concurrency.
    pub fn threads(mut self, value: usize) -> Self {
        self.threads = Some(value);
        self
    }

    /// Sets the idle-poll interval of the worker `get` loop.
    pub fn get_timeout(mut self, value: Duration) -> Self {
        self.get_timeout = Some(value);
        self
    }

    /// Sets the budget of one return-path `put` attempt.
    pub fn put_timeout(mut self, value: Duration) -> Self {
        self.put_timeout = Some(value);
        self
    }

    /// Sets the channel slots allocated per worker thread.
    pub fn capacity_per_thread(mut self, value: usize) -> Self {
        self.capacity_per_thread = Some(value);
        self
    }

    /// Builds the options, falling back to defaults for unset fields.
    pub fn build(self) -> LocalConsumerOptions {
        let defaults = LocalConsumerOptions::default();
        LocalConsumerOptions {
            threads: self.threads.unwrap_or(defaults.threads),
            get_timeout: self.get_timeout.unwrap_or(defaults.get_timeout),
            put_timeout: self.put_timeout.unwrap_or(defaults.put_timeout),
            capacity_per_thread: self
                .capacity_per_thread
                .unwrap_or(defaults.capacity_per_thread),
        }
    }
}

/// Thread-pool consumer executing work items in-process.
#[derive(Debug)]
pub struct LocalConsumer<W: WorkItem> {
    broker: Arc<Broker<W>>,
    options: LocalConsumerOptions,
    id: Option<ConsumerId>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    state: ConsumerState,
}

impl<W: WorkItem> LocalConsumer<W> {
    /// Creates a stopped consumer bound to `broker`.
    pub fn new(broker: Arc<Broker<W>>, options: LocalConsumerOptions) -> Self {
        Self {
            broker,
            options,
            id: None,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            state: ConsumerState::Stopped,
        }
    }

    /// Creates a stopped consumer with default options.
    pub fn with_defaults(broker: Arc<Broker<W>>) -> Self {
        Self::new(broker, LocalConsumerOptions::default())
    }

    fn effective_threads(&self) -> usize {
        if self.options.threads > 0 {
            self.options.threads
        } else {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        }
    }

    fn worker_loop(
        broker: Arc<Broker<W>>,
        id: ConsumerId,
        stop: Arc<AtomicBool>,
        get_timeout: Duration,
        put_timeout: Duration,
    ) {
        while !stop.load(Ordering::Acquire) {
            let (port, mut item) = match broker.get(id, get_timeout) {
                Ok(entry) => entry,
                Err(ExecutionError::Timeout(_)) => continue,
                Err(ExecutionError::BufferNotPresent(_)) => {
                    debug!(consumer = %id, "Channel gone, worker exiting");
                    break;
                }
                Err(e) => {
                    warn!(consumer = %id, error = %e, "Worker get failed, exiting");
                    break;
                }
            };

            let status = match item.process() {
                Ok(()) => ProcessingStatus::Processed,
                Err(e) => {
                    debug!(consumer = %id, port = %port, error = %e, "Item processing failed");
                    ProcessingStatus::Error
                }
            };
            item.set_status(status);

            let mut pending = item;
            loop {
                match broker.put_processed(id, port, pending, put_timeout) {
                    Ok(()) => break,
                    Err(PutError::Timeout(rejected)) => {
                        if stop.load(Ordering::Acquire) {
                            warn!(consumer = %id, port = %port, "Dropping processed item on shutdown");
                            break;
                        }
                        pending = rejected;
                    }
                    Err(other) => {
                        warn!(consumer = %id, port = %port, error = %other.to_error(), "Processed item lost");
                        break;
                    }
                }
            }
        }
    }
}

impl<W: WorkItem> Consumer for LocalConsumer<W> {
    fn start(&mut self) -> Result<()> {
        if self.state != ConsumerState::Stopped {
            return Err(ExecutionError::Configuration(
                "Local consumer is already running".to_string(),
            ));
        }

        let threads = self.effective_threads();
        let capacity = threads * self.options.capacity_per_thread;
        let id = self.broker.enrol(capacity);
        self.id = Some(id);
        self.stop.store(false, Ordering::Release);

        for index in 0..threads {
            let broker = Arc::clone(&self.broker);
            let stop = Arc::clone(&self.stop);
            let get_timeout = self.options.get_timeout;
            let put_timeout = self.options.put_timeout;
            let handle = thread::Builder::new()
                .name(format!("evobroker-worker-{}-{}", id, index))
                .spawn(move || Self::worker_loop(broker, id, stop, get_timeout, put_timeout))
                .map_err(ExecutionError::Io)?;
            self.workers.push(handle);
        }

        self.state = ConsumerState::Running;
        info!(consumer = %id, threads, "Local consumer started");
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.state != ConsumerState::Running {
            return Ok(());
        }
        self.state = ConsumerState::Draining;
        self.stop.store(true, Ordering::Release);

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("A worker thread panicked during shutdown");
            }
        }

        if let Some(id) = self.id.take() {
            self.broker.signoff(id)?;
            info!(consumer = %id, "Local consumer stopped");
        }
        self.state = ConsumerState::Stopped;
        Ok(())
    }

    fn id(&self) -> Option<ConsumerId> {
        self.id
    }

    fn state(&self) -> ConsumerState {
        self.state
    }
}

impl<W: WorkItem> Drop for LocalConsumer<W> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
