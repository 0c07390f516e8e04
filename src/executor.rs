//! # Executor
//!
//! The `Executor` is the population-facing façade used once per optimization
//! iteration: submit every still-unprocessed item of a collection, wait with
//! a bounded budget for results, and reconcile each return into its original
//! position by [`PortId`] — never by arrival order, since a later-submitted
//! item may come back first from a faster consumer.
//!
//! A call that cannot collect everything within its budget reports `false`
//! and leaves the missing positions marked [`ProcessingStatus::Unprocessed`];
//! the status vector tells the caller exactly which positions those are.
//! Algorithms that tolerate partial populations proceed; strict ones treat
//! the shortfall (or any [`ProcessingStatus::Error`]) as fatal for the
//! iteration. Total consumer loss therefore never hangs a run — it surfaces
//! as `work_on` returning `false` on every call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::broker::{Broker, PortId, PutError};
use crate::error::{ExecutionError, Result};
use crate::work_item::{ProcessingStatus, WorkItem};

/// Configuration for an [`Executor`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    wait_budget: Duration,
    poll_interval: Duration,
    put_timeout: Duration,
    resubmit_unprocessed: bool,
}

impl ExecutionOptions {
    /// Returns a builder for fluent configuration.
    pub fn builder() -> ExecutionOptionsBuilder {
        ExecutionOptionsBuilder::default()
    }

    /// Total submit-and-collect budget of one `work_on` call.
    pub fn get_wait_budget(&self) -> Duration {
        self.wait_budget
    }

    /// Upper bound of one collection poll.
    pub fn get_poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Budget of a single broker `put` attempt.
    pub fn get_put_timeout(&self) -> Duration {
        self.put_timeout
    }

    /// Whether lost items are restored into their slots for the next call.
    pub fn get_resubmit_unprocessed(&self) -> bool {
        self.resubmit_unprocessed
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            wait_budget: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            put_timeout: Duration::from_millis(200),
            resubmit_unprocessed: false,
        }
    }
}

/// Builder for [`ExecutionOptions`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptionsBuilder {
    wait_budget: Option<Duration>,
    poll_interval: Option<Duration>,
    put_timeout: Option<Duration>,
    resubmit_unprocessed: Option<bool>,
}

impl ExecutionOptionsBuilder {
    /// Sets the total budget of one `work_on` call.
    pub fn wait_budget(mut self, value: Duration) -> Self {
        self.wait_budget = Some(value);
        self
    }

    /// Sets the upper bound of one collection poll.
    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = Some(value);
        self
    }

    /// Sets the budget of a single broker `put` attempt.
    pub fn put_timeout(mut self, value: Duration) -> Self {
        self.put_timeout = Some(value);
        self
    }

    /// Sets the resubmission policy for items that never return.
    ///
    /// When on, the executor retains a clone of every submitted item and
    /// restores it into the original slot if the round trip is declared
    /// lost, so the next `work_on` call retries it. When off, the slot is
    /// left empty and the caller decides.
    pub fn resubmit_unprocessed(mut self, value: bool) -> Self {
        self.resubmit_unprocessed = Some(value);
        self
    }

    /// Builds the options, falling back to defaults for unset fields.
    pub fn build(self) -> ExecutionOptions {
        let defaults = ExecutionOptions::default();
        ExecutionOptions {
            wait_budget: self.wait_budget.unwrap_or(defaults.wait_budget),
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            put_timeout: self.put_timeout.unwrap_or(defaults.put_timeout),
            resubmit_unprocessed: self
                .resubmit_unprocessed
                .unwrap_or(defaults.resubmit_unprocessed),
        }
    }
}

/// Per-iteration broker connector for a population of work items.
#[derive(Debug)]
pub struct Executor<W: WorkItem> {
    broker: Arc<Broker<W>>,
    options: ExecutionOptions,
}

impl<W: WorkItem> Executor<W> {
    /// Creates an executor over `broker`.
    pub fn new(broker: Arc<Broker<W>>, options: ExecutionOptions) -> Self {
        Self { broker, options }
    }

    /// Creates an executor with default options.
    pub fn with_defaults(broker: Arc<Broker<W>>) -> Self {
        Self::new(broker, ExecutionOptions::default())
    }

    /// The options this executor runs with.
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Submits every still-unprocessed item and collects what returns
    /// within the wait budget.
    ///
    /// `items` and `status` are parallel vectors: position `i` of `status`
    /// tracks the item in slot `i`. Slots already marked
    /// [`ProcessingStatus::Processed`] are skipped (a previous partial round
    /// finished them). Returned items are written back into their original
    /// slots with their status taken from the round trip. Items that return
    /// with a port id this call never issued — stragglers from an earlier
    /// iteration — are appended to `old_returns`.
    ///
    /// Returns `Ok(true)` iff every unprocessed slot was dispatched and came
    /// back with status [`ProcessingStatus::Processed`]. An item that could
    /// not even be submitted (no consumers within the budget) counts against
    /// completeness like a lost one.
    ///
    /// # Errors
    ///
    /// Only contract violations error: mismatched vector lengths. Timeouts,
    /// lost items and remote processing failures are reported through the
    /// return value and the status vector.
    pub fn work_on(
        &self,
        items: &mut [Option<W>],
        status: &mut [ProcessingStatus],
        old_returns: &mut Vec<W>,
    ) -> Result<bool> {
        if items.len() != status.len() {
            return Err(ExecutionError::Configuration(format!(
                "Item and status vectors differ in length: {} vs {}",
                items.len(),
                status.len()
            )));
        }

        let deadline = Instant::now() + self.options.wait_budget;
        let mut in_flight: HashMap<PortId, usize> = HashMap::new();
        let mut retained: HashMap<PortId, W> = HashMap::new();

        // Submission phase: every unprocessed slot gets a fresh port id.
        let mut unsubmitted = 0usize;
        for (pos, slot) in items.iter_mut().enumerate() {
            if status[pos] == ProcessingStatus::Processed {
                continue;
            }
            let Some(item) = slot.take() else { continue };
            let port = self.broker.next_port();
            let clone = self
                .options
                .resubmit_unprocessed
                .then(|| item.clone());

            match self.submit_until(port, item, deadline) {
                Ok(()) => {
                    in_flight.insert(port, pos);
                    if let Some(clone) = clone {
                        retained.insert(port, clone);
                    }
                }
                Err(returned) => {
                    // Never left the population; the slot keeps the item.
                    *slot = Some(returned);
                    unsubmitted += 1;
                }
            }
        }

        let submitted = in_flight.len();
        if unsubmitted > 0 {
            warn!(unsubmitted, submitted, "Submission budget expired with items never dispatched");
        }
        debug!(submitted, "Submission phase complete");

        // Collection phase: reconcile strictly by port id.
        let mut failures = 0usize;
        while !in_flight.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let slice = (deadline - now).min(self.options.poll_interval);
            let Some((port, item)) = self.broker.try_collect(slice) else {
                continue;
            };
            match in_flight.remove(&port) {
                Some(pos) => {
                    if item.status() == ProcessingStatus::Error {
                        failures += 1;
                    }
                    status[pos] = item.status();
                    items[pos] = Some(item);
                    retained.remove(&port);
                }
                None => {
                    debug!(port = %port, "Straggler from an earlier iteration");
                    old_returns.push(item);
                }
            }
        }

        // Lost items: position stays unprocessed; restore the retained clone
        // so the next call can resubmit it.
        let lost = in_flight.len();
        if lost > 0 {
            warn!(lost, submitted, "Wait budget expired with items outstanding");
            for (port, pos) in in_flight {
                status[pos] = ProcessingStatus::Unprocessed;
                if let Some(clone) = retained.remove(&port) {
                    items[pos] = Some(clone);
                }
            }
        }

        Ok(unsubmitted == 0 && lost == 0 && failures == 0)
    }

    /// Retries one submission until it lands or the deadline passes, handing
    /// the item back on failure.
    fn submit_until(&self, port: PortId, item: W, deadline: Instant) -> std::result::Result<(), W> {
        let mut pending = item;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(pending);
            }
            let budget = (deadline - now).min(self.options.put_timeout);
            match self.broker.put(port, pending, budget) {
                Ok(()) => return Ok(()),
                Err(e @ PutError::NoConsumers(_)) => {
                    debug!(port = %port, "No consumers enrolled, retrying until deadline");
                    pending = e.into_item();
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(self.options.poll_interval.min(remaining));
                }
                Err(e) => {
                    pending = e.into_item();
                }
            }
        }
    }
}
