//! # Network Client
//!
//! The `NetworkClient` runs in a remote process and is the mirror image of
//! the [`crate::consumer::NetworkConsumer`]: it loops retrieve → process →
//! submit against the server's TCP endpoint until told to halt or a resource
//! ceiling is hit. Every request is its own connect/exchange/close cycle.
//!
//! Two ceilings bound a client's patience, and both are fatal only to the
//! client process itself: a maximum number of consecutive stalls (the server
//! answering `ready` with `nodata`) ends the run loop cleanly, and a maximum
//! number of failed TCP connection attempts aborts it with an error.

use std::marker::PhantomData;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::broker::PortId;
use crate::error::{ExecutionError, Result};
use crate::protocol::{
    read_command, read_compute_body, read_seed, write_command, write_result, Command, ResultFrame,
};
use crate::work_item::{ProcessingStatus, SerializationMode, WorkItem};

/// Configuration for a [`NetworkClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    max_connection_attempts: u32,
    retry_pause: Duration,
    max_stalls: u32,
    stall_pause: Duration,
    max_cycles: Option<u64>,
    max_duration: Option<Duration>,
    io_timeout: Duration,
}

impl ClientOptions {
    /// Returns a builder for fluent configuration.
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }

    /// Maximum failed TCP connects per request before giving up.
    pub fn get_max_connection_attempts(&self) -> u32 {
        self.max_connection_attempts
    }

    /// Pause between connection attempts.
    pub fn get_retry_pause(&self) -> Duration {
        self.retry_pause
    }

    /// Maximum consecutive empty `ready` answers before the run loop ends.
    pub fn get_max_stalls(&self) -> u32 {
        self.max_stalls
    }

    /// Sleep after an empty `ready` answer.
    pub fn get_stall_pause(&self) -> Duration {
        self.stall_pause
    }

    /// Optional ceiling on processed cycles.
    pub fn get_max_cycles(&self) -> Option<u64> {
        self.max_cycles
    }

    /// Optional ceiling on wall-clock run time.
    pub fn get_max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    /// Socket connect/read/write timeout.
    pub fn get_io_timeout(&self) -> Duration {
        self.io_timeout
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_connection_attempts: 10,
            retry_pause: Duration::from_millis(500),
            max_stalls: 10,
            stall_pause: Duration::from_millis(500),
            max_cycles: None,
            max_duration: None,
            io_timeout: Duration::from_secs(10),
        }
    }
}

/// Builder for [`ClientOptions`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptionsBuilder {
    max_connection_attempts: Option<u32>,
    retry_pause: Option<Duration>,
    max_stalls: Option<u32>,
    stall_pause: Option<Duration>,
    max_cycles: Option<u64>,
    max_duration: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl ClientOptionsBuilder {
    /// Sets the maximum failed TCP connects per request.
    pub fn max_connection_attempts(mut self, value: u32) -> Self {
        self.max_connection_attempts = Some(value);
        self
    }

    /// Sets the pause between connection attempts.
    pub fn retry_pause(mut self, value: Duration) -> Self {
        self.retry_pause = Some(value);
        self
    }

    /// Sets the consecutive-stall ceiling.
    pub fn max_stalls(mut self, value: u32) -> Self {
        self.max_stalls = Some(value);
        self
    }

    /// Sets the sleep after an empty answer.
    pub fn stall_pause(mut self, value: Duration) -> Self {
        self.stall_pause = Some(value);
        self
    }

    /// Sets a ceiling on processed cycles.
    pub fn max_cycles(mut self, value: u64) -> Self {
        self.max_cycles = Some(value);
        self
    }

    /// Sets a ceiling on wall-clock run time.
    pub fn max_duration(mut self, value: Duration) -> Self {
        self.max_duration = Some(value);
        self
    }

    /// Sets the socket timeout.
    pub fn io_timeout(mut self, value: Duration) -> Self {
        self.io_timeout = Some(value);
        self
    }

    /// Builds the options, falling back to defaults for unset fields.
    pub fn build(self) -> ClientOptions {
        let defaults = ClientOptions::default();
        ClientOptions {
            max_connection_attempts: self
                .max_connection_attempts
                .unwrap_or(defaults.max_connection_attempts),
            retry_pause: self.retry_pause.unwrap_or(defaults.retry_pause),
            max_stalls: self.max_stalls.unwrap_or(defaults.max_stalls),
            stall_pause: self.stall_pause.unwrap_or(defaults.stall_pause),
            max_cycles: self.max_cycles.or(defaults.max_cycles),
            max_duration: self.max_duration.or(defaults.max_duration),
            io_timeout: self.io_timeout.unwrap_or(defaults.io_timeout),
        }
    }
}

/// Remote evaluation client: retrieve → process → submit over TCP.
pub struct NetworkClient<W: WorkItem> {
    addr: SocketAddr,
    options: ClientOptions,
    seed: Option<u64>,
    cycles: u64,
    stalls: u32,
    started: Option<Instant>,
    halt_hook: Option<Box<dyn FnMut() -> bool + Send>>,
    _marker: PhantomData<W>,
}

impl<W: WorkItem> NetworkClient<W> {
    /// Creates a client for the server at `addr`.
    pub fn new<A: ToSocketAddrs>(addr: A, options: ClientOptions) -> Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ExecutionError::Configuration("Empty server address".to_string()))?;
        Ok(Self {
            addr,
            options,
            seed: None,
            cycles: 0,
            stalls: 0,
            started: None,
            halt_hook: None,
            _marker: PhantomData,
        })
    }

    /// Installs an additional halt predicate, checked once per loop
    /// iteration alongside the cycle and duration ceilings.
    pub fn with_halt_hook(mut self, hook: Box<dyn FnMut() -> bool + Send>) -> Self {
        self.halt_hook = Some(hook);
        self
    }

    /// The seed obtained by [`NetworkClient::init`], if any.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Number of items processed so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Connects for one exchange, retrying up to the configured attempt
    /// ceiling. Exceeding it is fatal to this client only.
    fn connect(&self) -> Result<TcpStream> {
        let max = self.options.max_connection_attempts.max(1);
        for attempt in 1..=max {
            match TcpStream::connect_timeout(&self.addr, self.options.io_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.options.io_timeout))?;
                    stream.set_write_timeout(Some(self.options.io_timeout))?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(attempt, max, error = %e, "Connect failed");
                    if attempt < max {
                        thread::sleep(self.options.retry_pause);
                    }
                }
            }
        }
        Err(ExecutionError::ConnectionAttemptsExceeded(
            max,
            self.addr.to_string(),
        ))
    }

    /// Requests the startup random seed via `getSeed` and stores it.
    pub fn init(&mut self) -> Result<u64> {
        let mut stream = self.connect()?;
        write_command(&mut stream, Command::GetSeed)?;
        let seed = read_seed(&mut stream)?;
        self.seed = Some(seed);
        info!(seed, "Client initialized");
        Ok(seed)
    }

    /// Requests one work item via `ready`.
    ///
    /// Returns `Ok(None)` for the benign no-work-yet answer; the run loop
    /// responds to that by sleeping and retrying within its stall budget.
    pub fn retrieve(&mut self) -> Result<Option<(W, SerializationMode, PortId)>> {
        let mut stream = self.connect()?;
        write_command(&mut stream, Command::Ready)?;
        match read_command(&mut stream)? {
            Command::Compute => {
                let frame = read_compute_body(&mut stream)?;
                let item = W::deserialize(&frame.payload, frame.mode)?;
                Ok(Some((item, frame.mode, frame.port)))
            }
            Command::NoData => Ok(None),
            unexpected => Err(ExecutionError::Protocol(format!(
                "Unexpected server answer to ready: {:?}",
                unexpected
            ))),
        }
    }

    /// Returns a computed item via `result`.
    pub fn submit(&mut self, item: &W, mode: SerializationMode, port: PortId) -> Result<()> {
        let payload = item.serialize(mode)?;
        let mut stream = self.connect()?;
        write_result(
            &mut stream,
            &ResultFrame {
                port,
                payload,
            },
        )
    }

    fn halt(&mut self) -> bool {
        if let Some(max) = self.options.max_cycles {
            if self.cycles >= max {
                return true;
            }
        }
        if let (Some(max), Some(started)) = (self.options.max_duration, self.started) {
            if started.elapsed() >= max {
                return true;
            }
        }
        if let Some(hook) = self.halt_hook.as_mut() {
            if hook() {
                return true;
            }
        }
        false
    }

    /// One retrieve → process → submit cycle.
    ///
    /// Returns `Ok(true)` when an item was processed, `Ok(false)` on a
    /// stall. Protocol faults abort only the exchange they occurred on.
    fn process_one(&mut self) -> Result<bool> {
        match self.retrieve()? {
            Some((mut item, mode, port)) => {
                let status = match item.process() {
                    Ok(()) => ProcessingStatus::Processed,
                    Err(e) => {
                        debug!(port = %port, error = %e, "Item processing failed");
                        ProcessingStatus::Error
                    }
                };
                item.set_status(status);
                self.submit(&item, mode, port)?;
                self.cycles += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs the processing loop until a halt condition or ceiling fires.
    ///
    /// Returns the number of items processed. Per-exchange protocol and I/O
    /// faults are retried within the stall budget; only the
    /// connection-attempt ceiling propagates as an error.
    pub fn run(&mut self) -> Result<u64> {
        if self.seed.is_none() {
            self.init()?;
        }
        self.started = Some(Instant::now());
        self.stalls = 0;

        loop {
            if self.halt() {
                info!(cycles = self.cycles, "Halt condition reached");
                break;
            }
            match self.process_one() {
                Ok(true) => {
                    self.stalls = 0;
                }
                Ok(false) => {
                    self.stalls += 1;
                    if self.stalls > self.options.max_stalls {
                        info!(stalls = self.stalls, "Stall ceiling reached, run ends");
                        break;
                    }
                    thread::sleep(self.options.stall_pause);
                }
                Err(e @ ExecutionError::ConnectionAttemptsExceeded(_, _)) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Exchange failed, retrying");
                    self.stalls += 1;
                    if self.stalls > self.options.max_stalls {
                        info!(stalls = self.stalls, "Stall ceiling reached, run ends");
                        break;
                    }
                    thread::sleep(self.options.stall_pause);
                }
            }
        }
        Ok(self.cycles)
    }
}
