//
// Test infrastructure: a driver whose behaviour is scripted per call, with fault injection for
// every provisioning step, and a runtime environment that records what was done to it.
//
#![allow(dead_code)]

use std::cmp::min;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use pktburst::buf::Buf;
use pktburst::buf_mmap::BufMmap;
use pktburst::buf_pool::BufPool;
use pktburst::config::PipelineConfig;
use pktburst::device::Device;
use pktburst::diag::MemoryDiagnostics;
use pktburst::driver::{Driver, DriverError};
use pktburst::env::{EnvError, RuntimeEnv};
use pktburst::lifecycle::Collaborators;
use pktburst::payload::PayloadSource;

/// Calls made to the driver and the environment, in order.
pub type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Configure,
    RxQueueSetup(u16),
    TxQueueSetup(u16),
    Start,
    /// tx_burst takes the whole batch and reports one more than it took
    OverAccept,
    /// rx_burst appends this many buffers beyond `max`
    OverReceive(usize),
    /// rx_burst takes a buffer out of the caller's vector
    StealRx,
}

#[derive(Default)]
pub struct Script {
    pub fault: Option<Fault>,

    /// Accepted count for each tx_burst, capped at the batch size. Accept all once empty.
    pub accept: VecDeque<usize>,

    /// Frames returned by each rx_burst, capped at max. Nothing once empty.
    pub receive: VecDeque<usize>,
    pub rx_frame_len: usize,

    /// Batch size of every tx_burst call
    pub submitted: Vec<usize>,

    /// Buffers the device accepted and has not completed yet
    pub held: Vec<BufMmap>,

    rx_pools: Vec<BufPool>,
}

#[derive(Clone)]
pub struct ScriptedDriver {
    pub script: Arc<Mutex<Script>>,
    log: CallLog,
}

impl ScriptedDriver {
    pub fn new(log: &CallLog) -> ScriptedDriver {
        ScriptedDriver {
            script: Default::default(),
            log: log.clone(),
        }
    }

    pub fn fail_at(self, fault: Fault) -> ScriptedDriver {
        self.script.lock().fault = Some(fault);
        self
    }

    pub fn accept(&self, counts: &[usize]) {
        self.script.lock().accept.extend(counts);
    }

    pub fn receive(&self, counts: &[usize], frame_len: usize) {
        let mut script = self.script.lock();
        script.receive.extend(counts);
        script.rx_frame_len = frame_len;
    }

    pub fn submitted(&self) -> Vec<usize> {
        self.script.lock().submitted.clone()
    }

    pub fn held_len(&self) -> usize {
        self.script.lock().held.len()
    }

    /// First payload byte of every held buffer, in acceptance order.
    pub fn held_tags(&self) -> Vec<u8> {
        self.script
            .lock()
            .held
            .iter()
            .map(|b| b.get_data()[0])
            .collect()
    }

    /// Complete every accepted buffer, as a NIC would after the wire.
    pub fn complete_all(&self) -> usize {
        let mut script = self.script.lock();
        let n = script.held.len();
        script.held.clear();
        n
    }

    fn call(&self, what: &str) {
        self.log.lock().push(format!("driver {}", what));
    }

    fn check(&self, fault: Fault) -> Result<(), DriverError> {
        if self.script.lock().fault == Some(fault) {
            return Err(DriverError::Failed(format!("injected {:?} failure", fault)));
        }
        Ok(())
    }
}

impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    fn configure(&mut self, _port_id: u16, _nb_rx: u16, _nb_tx: u16) -> Result<(), DriverError> {
        self.call("configure");
        self.check(Fault::Configure)
    }

    fn rx_queue_setup(
        &mut self,
        queue_id: u16,
        _depth: u16,
        pool: &BufPool,
    ) -> Result<(), DriverError> {
        self.call("rx queue setup");
        self.check(Fault::RxQueueSetup(queue_id))?;
        self.script.lock().rx_pools.push(pool.clone());
        Ok(())
    }

    fn tx_queue_setup(&mut self, queue_id: u16, _depth: u16) -> Result<(), DriverError> {
        self.call("tx queue setup");
        self.check(Fault::TxQueueSetup(queue_id))
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.call("start");
        self.check(Fault::Start)
    }

    fn stop(&mut self) -> usize {
        self.call("stop");
        self.complete_all()
    }

    fn close(&mut self) {
        self.call("close");
        self.script.lock().rx_pools.clear();
    }

    fn tx_burst(&mut self, _queue_id: u16, batch: &mut Vec<BufMmap>) -> usize {
        let mut script = self.script.lock();
        script.submitted.push(batch.len());

        if script.fault == Some(Fault::OverAccept) {
            let n = batch.len();
            script.held.extend(batch.drain(..));
            return n + 1;
        }

        let n = match script.accept.pop_front() {
            Some(n) => min(n, batch.len()),
            None => batch.len(),
        };
        script.held.extend(batch.drain(..n));
        n
    }

    fn rx_burst(&mut self, _queue_id: u16, bufs: &mut Vec<BufMmap>, max: usize) -> usize {
        let mut script = self.script.lock();
        let want = match script.fault {
            Some(Fault::StealRx) => {
                bufs.pop();
                return 0;
            }
            Some(Fault::OverReceive(extra)) => max + extra,
            _ => min(script.receive.pop_front().unwrap_or(0), max),
        };
        let pool = match script.rx_pools.first() {
            Some(pool) => pool.clone(),
            None => return 0,
        };
        let frame = vec![0x5a; script.rx_frame_len];

        let mut n = 0;
        while n < want {
            let mut buf = match pool.alloc() {
                Ok(buf) => buf,
                Err(_) => break,
            };
            if buf.append(&frame).is_err() {
                break;
            }
            bufs.push(buf);
            n += 1;
        }
        n
    }
}

pub struct RecordingEnv {
    log: CallLog,
    fail: bool,
}

impl RecordingEnv {
    pub fn new(log: &CallLog) -> RecordingEnv {
        RecordingEnv {
            log: log.clone(),
            fail: false,
        }
    }

    pub fn failing(log: &CallLog) -> RecordingEnv {
        RecordingEnv {
            log: log.clone(),
            fail: true,
        }
    }
}

impl RuntimeEnv for RecordingEnv {
    fn init(&mut self, _args: &[String]) -> Result<(), EnvError> {
        self.log.lock().push("env init".to_string());
        if self.fail {
            return Err(EnvError::Failed("injected init failure".to_string()));
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.log.lock().push("env teardown".to_string());
    }
}

/// Tags every payload with a running counter in its first byte.
#[derive(Default)]
pub struct NumberedPayload {
    next: u8,
    buf: [u8; 16],
}

impl PayloadSource for NumberedPayload {
    fn next_payload(&mut self) -> &[u8] {
        self.buf[0] = self.next;
        self.next = self.next.wrapping_add(1);
        &self.buf
    }
}

/// Small geometry, one RX and one TX queue, no periodic stats.
pub fn config() -> PipelineConfig {
    PipelineConfig {
        pool_capacity: 128,
        pool_cache_size: 8,
        buffer_size: 256,
        buffer_headroom: 0,
        rx_queue_depth: 64,
        tx_queue_depth: 64,
        nb_rx_queues: 1,
        nb_tx_queues: 1,
        stats_interval_secs: 0,
        ..Default::default()
    }
}

pub fn collaborators(
    driver: &ScriptedDriver,
    env: RecordingEnv,
    diag: &Arc<MemoryDiagnostics>,
) -> Collaborators {
    Collaborators {
        env: Box::new(env),
        driver: Box::new(driver.clone()),
        diag: diag.clone(),
    }
}

/// A device with one RX and one TX queue, already running.
pub fn running_device(
    driver: &ScriptedDriver,
    pool: &BufPool,
    diag: &Arc<MemoryDiagnostics>,
) -> Device {
    let mut dev = Device::new(0, Box::new(driver.clone()), diag.clone());
    dev.configure(1, 1).unwrap();
    dev.rx_queue_setup(0, 64, pool).unwrap();
    dev.tx_queue_setup(0, 64).unwrap();
    dev.start().unwrap();
    dev.set_running().unwrap();
    dev
}
