use std::sync::Arc;
use std::thread;
use std::time::Duration;

use evobroker::broker::Broker;
use evobroker::consumer::{Consumer, LocalConsumer, LocalConsumerOptions};
use evobroker::error::{ExecutionError, Result};
use evobroker::executor::{ExecutionOptions, Executor};
use evobroker::work_item::{ProcessingStatus, SerializationMode, WorkItem};

#[derive(Clone, Debug)]
struct SquareItem {
    value: f64,
    fitness: Option<f64>,
    sleep_ms: u64,
    fail: bool,
    status: ProcessingStatus,
}

impl SquareItem {
    fn new(value: f64) -> Self {
        Self {
            value,
            fitness: None,
            sleep_ms: 0,
            fail: false,
            status: ProcessingStatus::Unprocessed,
        }
    }

    fn slow(value: f64, sleep_ms: u64) -> Self {
        Self {
            sleep_ms,
            ..Self::new(value)
        }
    }

    fn failing(value: f64) -> Self {
        Self {
            fail: true,
            ..Self::new(value)
        }
    }
}

impl WorkItem for SquareItem {
    fn process(&mut self) -> Result<()> {
        if self.sleep_ms > 0 {
            thread::sleep(Duration::from_millis(self.sleep_ms));
        }
        if self.fail {
            return Err(ExecutionError::Processing(
                "evaluation rejected this candidate".to_string(),
            ));
        }
        self.fitness = Some(self.value * self.value);
        Ok(())
    }

    fn status(&self) -> ProcessingStatus {
        self.status
    }

    fn set_status(&mut self, status: ProcessingStatus) {
        self.status = status;
    }

    fn serialize(&self, _mode: SerializationMode) -> Result<Vec<u8>> {
        serde_json::to_vec(&(self.value, self.fitness, self.sleep_ms, self.fail))
            .map_err(|e| ExecutionError::Serialization(e.to_string()))
    }

    fn deserialize(bytes: &[u8], _mode: SerializationMode) -> Result<Self> {
        let (value, fitness, sleep_ms, fail): (f64, Option<f64>, u64, bool) =
            serde_json::from_slice(bytes)
                .map_err(|e| ExecutionError::Serialization(e.to_string()))?;
        Ok(Self {
            value,
            fitness,
            sleep_ms,
            fail,
            status: ProcessingStatus::Unprocessed,
        })
    }
}

fn population(items: Vec<SquareItem>) -> (Vec<Option<SquareItem>>, Vec<ProcessingStatus>) {
    let status = vec![ProcessingStatus::Unprocessed; items.len()];
    (items.into_iter().map(Some).collect(), status)
}

fn start_local_consumer(
    broker: &Arc<Broker<SquareItem>>,
    threads: usize,
) -> LocalConsumer<SquareItem> {
    let mut consumer = LocalConsumer::new(
        Arc::clone(broker),
        LocalConsumerOptions::builder()
            .threads(threads)
            .get_timeout(Duration::from_millis(10))
            .build(),
    );
    consumer.start().unwrap();
    consumer
}

#[test]
fn test_end_to_end_full_generation() {
    let broker: Arc<Broker<SquareItem>> = Arc::new(Broker::new());
    let mut consumer = start_local_consumer(&broker, 2);

    let executor = Executor::with_defaults(Arc::clone(&broker));
    let (mut items, mut status) = population((0..10).map(|i| SquareItem::new(i as f64)).collect());
    let mut old_returns = Vec::new();

    let complete = executor
        .work_on(&mut items, &mut status, &mut old_returns)
        .unwrap();

    assert!(complete);
    assert!(old_returns.is_empty());
    for (i, slot) in items.iter().enumerate() {
        let item = slot.as_ref().expect("every item must round-trip");
        assert_eq!(status[i], ProcessingStatus::Processed);
        assert_eq!(item.status(), ProcessingStatus::Processed);
        assert_eq!(item.fitness, Some((i as f64) * (i as f64)));
    }

    consumer.shutdown().unwrap();
}

#[test]
fn test_partial_return_accounting() {
    let broker: Arc<Broker<SquareItem>> = Arc::new(Broker::new());
    let mut consumer = start_local_consumer(&broker, 6);

    // Four fast items and two artificially delayed past the wait budget.
    // With six workers every item is picked up immediately, so exactly the
    // two slow positions miss the deadline.
    let slow_positions = [1usize, 4];
    let entries: Vec<SquareItem> = (0..6)
        .map(|i| {
            if slow_positions.contains(&i) {
                SquareItem::slow(i as f64, 2_000)
            } else {
                SquareItem::new(i as f64)
            }
        })
        .collect();
    let (mut items, mut status) = population(entries);
    let mut old_returns = Vec::new();

    let executor = Executor::new(
        Arc::clone(&broker),
        ExecutionOptions::builder()
            .wait_budget(Duration::from_millis(700))
            .build(),
    );
    let complete = executor
        .work_on(&mut items, &mut status, &mut old_returns)
        .unwrap();

    assert!(!complete);
    for i in 0..6 {
        if slow_positions.contains(&i) {
            assert_eq!(status[i], ProcessingStatus::Unprocessed);
            assert!(items[i].is_none(), "lost slot must stay empty without resubmit policy");
        } else {
            assert_eq!(status[i], ProcessingStatus::Processed);
            let item = items[i].as_ref().unwrap();
            assert_eq!(item.value, i as f64);
            assert_eq!(item.fitness, Some((i as f64) * (i as f64)));
        }
    }

    consumer.shutdown().unwrap();
}

#[test]
fn test_processing_failure_is_distinct_from_loss() {
    let broker: Arc<Broker<SquareItem>> = Arc::new(Broker::new());
    let mut consumer = start_local_consumer(&broker, 2);

    let (mut items, mut status) =
        population(vec![SquareItem::new(1.0), SquareItem::failing(2.0)]);
    let mut old_returns = Vec::new();

    let executor = Executor::with_defaults(Arc::clone(&broker));
    let complete = executor
        .work_on(&mut items, &mut status, &mut old_returns)
        .unwrap();

    assert!(!complete);
    assert_eq!(status[0], ProcessingStatus::Processed);
    // The failed item did round-trip: Error, not Unprocessed, and the slot
    // holds the returned item.
    assert_eq!(status[1], ProcessingStatus::Error);
    assert!(items[1].is_some());

    consumer.shutdown().unwrap();
}

#[test]
fn test_already_processed_slots_are_skipped() {
    let broker: Arc<Broker<SquareItem>> = Arc::new(Broker::new());
    let mut consumer = start_local_consumer(&broker, 2);

    let mut finished = SquareItem::new(9.0);
    finished.fitness = Some(123.0);
    finished.set_status(ProcessingStatus::Processed);

    let (mut items, mut status) = population(vec![finished, SquareItem::new(3.0)]);
    status[0] = ProcessingStatus::Processed;
    let mut old_returns = Vec::new();

    let executor = Executor::with_defaults(Arc::clone(&broker));
    let complete = executor
        .work_on(&mut items, &mut status, &mut old_returns)
        .unwrap();

    assert!(complete);
    // Position 0 was never resubmitted: its sentinel fitness is untouched.
    assert_eq!(items[0].as_ref().unwrap().fitness, Some(123.0));
    assert_eq!(items[1].as_ref().unwrap().fitness, Some(9.0));

    consumer.shutdown().unwrap();
}

#[test]
fn test_total_consumer_loss_reports_false_not_hang() {
    let broker: Arc<Broker<SquareItem>> = Arc::new(Broker::new());
    let executor = Executor::new(
        Arc::clone(&broker),
        ExecutionOptions::builder()
            .wait_budget(Duration::from_millis(150))
            .resubmit_unprocessed(true)
            .build(),
    );

    let (mut items, mut status) = population(vec![SquareItem::new(5.0)]);
    let mut old_returns = Vec::new();

    // No consumers enrolled: every call must come back false within its
    // budget, with the item preserved for the next attempt.
    for _ in 0..2 {
        let complete = executor
            .work_on(&mut items, &mut status, &mut old_returns)
            .unwrap();
        assert!(!complete);
        assert_eq!(status[0], ProcessingStatus::Unprocessed);
        assert!(items[0].is_some());
    }

    // A consumer appears; the same population now completes.
    let mut consumer = start_local_consumer(&broker, 1);
    let complete = executor
        .work_on(&mut items, &mut status, &mut old_returns)
        .unwrap();
    assert!(complete);
    assert_eq!(items[0].as_ref().unwrap().fitness, Some(25.0));

    consumer.shutdown().unwrap();
}

#[test]
fn test_lost_in_flight_item_is_restored_from_its_clone() {
    let broker: Arc<Broker<SquareItem>> = Arc::new(Broker::new());
    let mut consumer = start_local_consumer(&broker, 1);

    // The item is picked up by the worker but outlives the budget, so it is
    // declared lost while genuinely in flight. With the resubmit policy on,
    // the slot must hold the retained clone afterwards.
    let (mut items, mut status) = population(vec![SquareItem::slow(2.0, 300)]);
    let mut old_returns = Vec::new();
    let executor = Executor::new(
        Arc::clone(&broker),
        ExecutionOptions::builder()
            .wait_budget(Duration::from_millis(100))
            .resubmit_unprocessed(true)
            .build(),
    );
    let complete = executor
        .work_on(&mut items, &mut status, &mut old_returns)
        .unwrap();
    assert!(!complete);
    assert_eq!(status[0], ProcessingStatus::Unprocessed);
    let restored = items[0].as_ref().expect("slot must hold the restored clone");
    assert_eq!(restored.value, 2.0);
    assert!(restored.fitness.is_none(), "clone predates processing");

    // A patient retry completes the restored clone; the first round's
    // original eventually returns under its stale port and is diverted.
    let patient = Executor::new(
        Arc::clone(&broker),
        ExecutionOptions::builder()
            .wait_budget(Duration::from_secs(5))
            .resubmit_unprocessed(true)
            .build(),
    );
    let complete = patient
        .work_on(&mut items, &mut status, &mut old_returns)
        .unwrap();
    assert!(complete);
    assert_eq!(status[0], ProcessingStatus::Processed);
    assert_eq!(items[0].as_ref().unwrap().fitness, Some(4.0));
    assert_eq!(old_returns.len(), 1);
    assert_eq!(old_returns[0].value, 2.0);

    consumer.shutdown().unwrap();
}

#[test]
fn test_straggler_lands_in_old_returns() {
    let broker: Arc<Broker<SquareItem>> = Arc::new(Broker::new());
    let mut consumer = start_local_consumer(&broker, 1);

    // First call: one item slower than the budget. It is declared lost.
    let (mut items, mut status) = population(vec![SquareItem::slow(2.0, 300)]);
    let mut old_returns = Vec::new();
    let executor = Executor::new(
        Arc::clone(&broker),
        ExecutionOptions::builder()
            .wait_budget(Duration::from_millis(100))
            .build(),
    );
    let complete = executor
        .work_on(&mut items, &mut status, &mut old_returns)
        .unwrap();
    assert!(!complete);
    assert!(old_returns.is_empty());

    // Give the worker time to finish and park the result.
    thread::sleep(Duration::from_millis(400));

    // Second call with a fresh item: the straggler from the first round is
    // harvested while waiting, but its port belongs to no current position.
    let patient = Executor::new(
        Arc::clone(&broker),
        ExecutionOptions::builder()
            .wait_budget(Duration::from_secs(5))
            .build(),
    );
    let (mut items2, mut status2) = population(vec![SquareItem::new(3.0)]);
    let complete = patient
        .work_on(&mut items2, &mut status2, &mut old_returns)
        .unwrap();

    assert!(complete);
    assert_eq!(old_returns.len(), 1);
    assert_eq!(old_returns[0].value, 2.0);
    assert_eq!(old_returns[0].status(), ProcessingStatus::Processed);

    consumer.shutdown().unwrap();
}

#[test]
fn test_mismatched_vectors_are_a_contract_violation() {
    let broker: Arc<Broker<SquareItem>> = Arc::new(Broker::new());
    let executor = Executor::with_defaults(broker);

    let mut items = vec![Some(SquareItem::new(1.0))];
    let mut status = vec![ProcessingStatus::Unprocessed; 2];
    let mut old_returns = Vec::new();

    let result = executor.work_on(&mut items, &mut status, &mut old_returns);
    assert!(matches!(result, Err(ExecutionError::Configuration(_))));
}
