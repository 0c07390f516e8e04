//! # Network Consumer
//!
//! The `NetworkConsumer` is the server side of the wire protocol in
//! [`crate::protocol`]: it listens on a TCP endpoint and converts each
//! stop-and-wait exchange from a remote [`crate::client::NetworkClient`]
//! into broker `get`/`put_processed`/`seed` calls.
//!
//! Every request arrives on a fresh connection, so a hung client can stall at
//! most its own exchange: each accepted stream carries socket read/write
//! timeouts, and a protocol fault drops that connection only. The accept
//! loop itself is non-blocking with a short sleep so the stop flag is
//! observed promptly.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Consumer, ConsumerState};
use crate::broker::{Broker, ConsumerId};
use crate::error::{ExecutionError, Result};
use crate::protocol::{
    read_command, read_result_body, write_command, write_compute, write_seed, Command,
    ComputeFrame,
};
use crate::work_item::{SerializationMode, WorkItem};

/// Configuration for a [`NetworkConsumer`].
#[derive(Debug, Clone)]
pub struct NetworkOptions {
    mode: SerializationMode,
    capacity: usize,
    io_timeout: Duration,
    get_timeout: Duration,
    put_timeout: Duration,
}

impl NetworkOptions {
    /// Returns a builder for fluent configuration.
    pub fn builder() -> NetworkOptionsBuilder {
        NetworkOptionsBuilder::default()
    }

    /// Serialization mode advertised in every compute frame and used to
    /// decode every result payload.
    pub fn get_mode(&self) -> SerializationMode {
        self.mode
    }

    /// Buffer depth of the broker channel allocated at enrolment.
    pub fn get_capacity(&self) -> usize {
        self.capacity
    }

    /// Socket read/write timeout applied to every accepted connection.
    pub fn get_io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// How long a `ready` request waits for raw work before answering
    /// `nodata`.
    pub fn get_get_timeout(&self) -> Duration {
        self.get_timeout
    }

    /// Budget for landing a returned item in the processed queue.
    pub fn get_put_timeout(&self) -> Duration {
        self.put_timeout
    }
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            mode: SerializationMode::Text,
            capacity: 16,
            io_timeout: Duration::from_secs(10),
            get_timeout: Duration::from_millis(50),
            put_timeout: Duration::from_millis(500),
        }
    }
}

/// Builder for [`NetworkOptions`].
#[derive(Debug, Clone, Default)]
pub struct NetworkOptionsBuilder {
    mode: Option<SerializationMode>,
    capacity: Option<usize>,
    io_timeout: Option<Duration>,
    get_timeout: Option<Duration>,
    put_timeout: Option<Duration>,
}

impl NetworkOptionsBuilder {
    /// Sets the serialization mode for all payloads on this endpoint.
    pub fn mode(mut self, value: SerializationMode) -> Self {
        self.mode = Some(value);
        self
    }

    /// Sets the broker channel capacity.
    pub fn capacity(mut self, value: usize) -> Self {
        self.capacity = Some(value);
        self
    }

    /// Sets the per-connection socket timeout.
    pub fn io_timeout(mut self, value: Duration) -> Self {
        self.io_timeout = Some(value);
        self
    }

    /// Sets the wait for raw work before a `nodata` answer.
    pub fn get_timeout(mut self, value: Duration) -> Self {
        self.get_timeout = Some(value);
        self
    }

    /// Sets the budget for landing a returned item.
    pub fn put_timeout(mut self, value: Duration) -> Self {
        self.put_timeout = Some(value);
        self
    }

    /// Builds the options, falling back to defaults for unset fields.
    pub fn build(self) -> NetworkOptions {
        let defaults = NetworkOptions::default();
        NetworkOptions {
            mode: self.mode.unwrap_or(defaults.mode),
            capacity: self.capacity.unwrap_or(defaults.capacity),
            io_timeout: self.io_timeout.unwrap_or(defaults.io_timeout),
            get_timeout: self.get_timeout.unwrap_or(defaults.get_timeout),
            put_timeout: self.put_timeout.unwrap_or(defaults.put_timeout),
        }
    }
}

/// TCP server consumer serving remote evaluation clients.
#[derive(Debug)]
pub struct NetworkConsumer<W: WorkItem> {
    broker: Arc<Broker<W>>,
    bind_addr: SocketAddr,
    options: NetworkOptions,
    id: Option<ConsumerId>,
    local_addr: Option<SocketAddr>,
    stop: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    state: ConsumerState,
}

impl<W: WorkItem> NetworkConsumer<W> {
    /// Creates a stopped network consumer that will bind `addr` on start.
    ///
    /// Binding to port 0 and reading back [`NetworkConsumer::local_addr`]
    /// gives an ephemeral endpoint, which is what tests use.
    pub fn new<A: ToSocketAddrs>(
        broker: Arc<Broker<W>>,
        addr: A,
        options: NetworkOptions,
    ) -> Result<Self> {
        let bind_addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ExecutionError::Configuration("Empty bind address".to_string()))?;
        Ok(Self {
            broker,
            bind_addr,
            options,
            id: None,
            local_addr: None,
            stop: Arc::new(AtomicBool::new(false)),
            acceptor: None,
            state: ConsumerState::Stopped,
        })
    }

    /// The address actually bound, available once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn accept_loop(
        listener: TcpListener,
        broker: Arc<Broker<W>>,
        id: ConsumerId,
        options: NetworkOptions,
        stop: Arc<AtomicBool>,
    ) {
        while !stop.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let broker = Arc::clone(&broker);
                    let options = options.clone();
                    let builder = thread::Builder::new().name("evobroker-exchange".to_string());
                    let spawned = builder.spawn(move || {
                        if let Err(e) = Self::serve_connection(&broker, id, &options, stream) {
                            warn!(peer = %peer, error = %e, "Exchange aborted");
                        }
                    });
                    if let Err(e) = spawned {
                        warn!(error = %e, "Could not spawn exchange thread");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    thread::sleep(Duration::from_millis(20));
                }
            }
        }
        debug!(consumer = %id, "Accept loop stopped");
    }

    /// Serves one stop-and-wait exchange on an accepted connection.
    fn serve_connection(
        broker: &Broker<W>,
        id: ConsumerId,
        options: &NetworkOptions,
        mut stream: TcpStream,
    ) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(options.io_timeout))?;
        stream.set_write_timeout(Some(options.io_timeout))?;

        match read_command(&mut stream)? {
            Command::Ready => match broker.get(id, options.get_timeout) {
                Ok((port, item)) => {
                    let dispatched = item.serialize(options.mode).and_then(|payload| {
                        debug!(port = %port, bytes = payload.len(), "Dispatching work item");
                        write_compute(
                            &mut stream,
                            &ComputeFrame {
                                mode: options.mode,
                                port,
                                payload,
                            },
                        )
                    });
                    if let Err(e) = &dispatched {
                        warn!(port = %port, error = %e, "Work item dropped, dispatch failed");
                    }
                    dispatched
                }
                // No work right now, or the channel is being torn down:
                // either way the client sleeps and retries.
                Err(_) => write_command(&mut stream, Command::NoData),
            },
            Command::Result => {
                let frame = read_result_body(&mut stream)?;
                let item = W::deserialize(&frame.payload, options.mode)?;
                debug!(port = %frame.port, bytes = frame.payload.len(), "Result received");
                broker
                    .put_processed(id, frame.port, item, options.put_timeout)
                    .map_err(|e| e.to_error())
            }
            Command::GetSeed => {
                let seed = broker.seed();
                debug!(seed, "Seed handed out");
                write_seed(&mut stream, seed)
            }
            unexpected => Err(ExecutionError::Protocol(format!(
                "Unexpected client command: {:?}",
                unexpected
            ))),
        }
    }
}

impl<W: WorkItem> Consumer for NetworkConsumer<W> {
    fn start(&mut self) -> Result<()> {
        if self.state != ConsumerState::Stopped {
            return Err(ExecutionError::Configuration(
                "Network consumer is already running".to_string(),
            ));
        }

        let listener = TcpListener::bind(self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let id = self.broker.enrol(self.options.capacity);
        self.id = Some(id);
        self.stop.store(false, Ordering::Release);

        let broker = Arc::clone(&self.broker);
        let options = self.options.clone();
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name(format!("evobroker-acceptor-{}", id))
            .spawn(move || Self::accept_loop(listener, broker, id, options, stop))
            .map_err(ExecutionError::Io)?;
        self.acceptor = Some(handle);

        self.state = ConsumerState::Running;
        info!(consumer = %id, addr = %local_addr, "Network consumer listening");
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.state != ConsumerState::Running {
            return Ok(());
        }
        self.state = ConsumerState::Draining;
        self.stop.store(true, Ordering::Release);

        if let Some(handle) = self.acceptor.take() {
            if handle.join().is_err() {
                warn!("Acceptor thread panicked during shutdown");
            }
        }

        if let Some(id) = self.id.take() {
            self.broker.signoff(id)?;
            info!(consumer = %id, "Network consumer stopped");
        }
        self.local_addr = None;
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

impl<W: WorkItem> Drop for NetworkConsumer<W> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
