mod common;

use std::sync::Arc;

use common::{collaborators, config, running_device, CallLog, Fault, RecordingEnv, ScriptedDriver};
use pktburst::buf_pool::BufPool;
use pktburst::device::DeviceError;
use pktburst::diag::MemoryDiagnostics;
use pktburst::engine::{BurstEngine, StopToken};
use pktburst::lifecycle::{LifecycleState, Pipeline, RunError, RunOptions, EXIT_RUNTIME};
use pktburst::payload::{CountingSink, StaticPayload};
use pktburst::rx::RxEngine;
use pktburst::tx::TxEngine;

#[test]
fn tx_over_report_is_an_error_and_leaks_nothing() {
    let log = CallLog::default();
    let driver = ScriptedDriver::new(&log).fail_at(Fault::OverAccept);
    let diag = Arc::new(MemoryDiagnostics::new());
    let pool = BufPool::create(64, 0, 128).unwrap();
    let mut dev = running_device(&driver, &pool, &diag);
    let mut tx = TxEngine::new(0, 8, StaticPayload::default());

    let r = tx.burst(&mut dev, &pool, &*diag);

    assert!(matches!(r, Err(DeviceError::DriverContract(_))));
    assert_eq!(pool.issued_count(), driver.held_len());
    assert_eq!(pool.issued_count() + pool.free_count(), pool.capacity());

    assert_eq!(driver.complete_all(), 8);
    assert_eq!(pool.free_count(), 64);
}

#[test]
fn rx_over_delivery_is_an_error_and_returns_the_buffers() {
    let log = CallLog::default();
    let driver = ScriptedDriver::new(&log).fail_at(Fault::OverReceive(3));
    driver.receive(&[], 60);
    let diag = Arc::new(MemoryDiagnostics::new());
    let pool = BufPool::create(64, 0, 128).unwrap();
    let mut dev = running_device(&driver, &pool, &diag);

    let mut bufs = Vec::new();
    let r = dev.rx_burst(0, &mut bufs, 4);

    assert!(matches!(r, Err(DeviceError::DriverContract(_))));
    assert!(bufs.is_empty());
    assert_eq!(pool.issued_count(), 0);

    // Through the engine, the next poll starts clean.
    let mut rx = RxEngine::new(0, 4, CountingSink::default());
    assert!(rx.burst(&mut dev, &pool).is_err());
    assert!(rx.burst(&mut dev, &pool).is_err());
    assert_eq!(rx.sink().packets, 0);
    assert_eq!(pool.issued_count(), 0);
}

#[test]
fn rx_removing_caller_buffers_is_an_error() {
    let log = CallLog::default();
    let driver = ScriptedDriver::new(&log).fail_at(Fault::StealRx);
    let diag = Arc::new(MemoryDiagnostics::new());
    let pool = BufPool::create(8, 0, 128).unwrap();
    let mut dev = running_device(&driver, &pool, &diag);

    let mut bufs = Vec::new();
    pool.get(&mut bufs, 1);

    let r = dev.rx_burst(0, &mut bufs, 4);

    assert!(matches!(r, Err(DeviceError::DriverContract(_))));
    assert!(bufs.is_empty());
    assert_eq!(pool.free_count(), 8);
}

#[test]
fn contract_violation_while_running_stops_the_pipeline() {
    let log = CallLog::default();
    let driver = ScriptedDriver::new(&log).fail_at(Fault::OverAccept);
    let diag = Arc::new(MemoryDiagnostics::new());

    let mut pipeline = Pipeline::provision(
        &config(),
        collaborators(&driver, RecordingEnv::new(&log), &diag),
        &[],
    )
    .unwrap();

    let mut tx = TxEngine::new(0, 8, StaticPayload::default());
    let mut engines: [&mut dyn BurstEngine; 1] = [&mut tx];
    let options = RunOptions {
        max_iterations: Some(10),
        stats_interval: None,
    };
    let r = pipeline.run(&mut engines, &StopToken::new(), &options);

    match r {
        Err(err @ RunError::Device(DeviceError::DriverContract(_))) => {
            assert_eq!(err.exit_code(), EXIT_RUNTIME)
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(pipeline.state(), LifecycleState::Stopped);

    // Stopping reclaimed what the driver kept.
    assert_eq!(driver.held_len(), 0);
    assert_eq!(pipeline.pool().issued_count(), 0);
    assert_eq!(driver.submitted(), vec![8]);
}
