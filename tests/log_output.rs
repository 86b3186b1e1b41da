//! Log output of the node.
//!
//! Installs a process-wide logger. The tests take `SERIAL` so records of one
//! test never land in another.

mod common;

use std::sync::{Mutex, MutexGuard};

use common::{FakeEncoder, FakeLink, FakeSensor, FakeTransport, at_secs, config};
use embassy_futures::block_on;
use log::{Level, LevelFilter, Log, Metadata, Record};
use pc_table::NodeConfig;
use pc_table::dht::SensorError;
use pc_table::dispatcher::{CommandDispatcher, DispatchOutcome};
use pc_table::node::Node;
use pc_table::publisher::PublishOutcome;
use pc_table::state::NodeState;

static RECORDS: Mutex<Vec<(Level, String)>> = Mutex::new(Vec::new());
static SERIAL: Mutex<()> = Mutex::new(());

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        RECORDS
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

fn take_records() -> Vec<(Level, String)> {
    std::mem::take(&mut *RECORDS.lock().unwrap())
}

fn capture() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    // Only the first test to get here installs it
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
    take_records();
    guard
}

#[test]
fn commands_and_their_log_entries() {
    let _serial = capture();

    let config = NodeConfig::default();
    let dispatcher = CommandDispatcher::new(&config);
    let mut state = NodeState::for_config(&config);

    assert_eq!(
        dispatcher.on_message(&mut state, "light/chain/main", b"true"),
        DispatchOutcome::Applied(true)
    );
    assert_eq!(state.actuator("chain_main"), Some(true));
    let records = take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, Level::Info);
    assert!(records[0].1.contains("chain_main"));

    assert_eq!(
        dispatcher.on_message(&mut state, "light/chain/main", b"false"),
        DispatchOutcome::Applied(false)
    );
    assert_eq!(state.actuator("chain_main"), Some(false));
    take_records();

    // Invalid payload: no state change, exactly one invalid-command entry
    let before = state.clone();
    assert_eq!(
        dispatcher.on_message(&mut state, "light/chain/main", b"maybe"),
        DispatchOutcome::Invalid
    );
    assert_eq!(state, before);
    let records = take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, Level::Warn);
    assert!(records[0].1.contains("Invalid command"));
    assert!(records[0].1.contains("light/chain/main"));
    assert!(records[0].1.contains("maybe"));

    // Unknown topics are dropped silently
    assert_eq!(
        dispatcher.on_message(&mut state, "light/chain/attic", b"true"),
        DispatchOutcome::Ignored
    );
    assert_eq!(state, before);
    assert!(take_records().is_empty());
}

#[test]
fn failed_measurement_is_logged_once() {
    let _serial = capture();

    let mut sensor = FakeSensor::default();
    sensor.push_failure(SensorError::Checksum);
    let mut node = Node::new(
        &config(&[("LIVENESS_INTERVAL_MS", "60000")]),
        FakeLink::up(),
        FakeTransport::reachable(),
        sensor,
        [FakeEncoder::default(), FakeEncoder::default()],
        at_secs(0),
    )
    .unwrap();
    block_on(node.run_once(at_secs(0)));
    take_records();

    let report = block_on(node.run_once(at_secs(10)));

    assert_eq!(
        report.measurement,
        PublishOutcome::SensorFailed(SensorError::Checksum)
    );
    assert!(node.session().transport().publishes().is_empty());
    let warnings: Vec<_> = take_records()
        .into_iter()
        .filter(|(level, _)| *level == Level::Warn)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].1.contains("Measurement failed"));
}
