use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::buf_mmap::BufMmap;
use crate::buf_pool::BufPool;
use crate::diag::{Diagnostics, Event};
use crate::driver::{Driver, DriverError};
use crate::util::is_pow_of_two;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unconfigured,
    Configured,
    QueuesReady,
    Started,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Rx,
    Tx,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Rx => f.write_str("RX"),
            QueueKind::Tx => f.write_str("TX"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{op} not allowed in state {state:?}")]
    InvalidState {
        op: &'static str,
        state: DeviceState,
    },

    #[error("burst attempted while device is {0:?}")]
    NotRunning(DeviceState),

    #[error("a device needs at least one queue")]
    NoQueues,

    #[error("{kind} queue {queue_id} does not exist")]
    InvalidQueue { kind: QueueKind, queue_id: u16 },

    #[error("{kind} queue {queue_id} is already set up")]
    QueueExists { kind: QueueKind, queue_id: u16 },

    #[error("ring depth {0} must be a non-zero power of two")]
    InvalidDepth(u16),

    #[error("driver broke the burst contract: {0}")]
    DriverContract(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

struct RxQueue {
    depth: u16,
    // Keeps the replenishing pool alive for as long as the queue exists.
    _pool: BufPool,
}

struct TxQueue {
    depth: u16,
}

/// A network port and its queues. Owns the driver.
///
/// Queues only exist between `configure` and the drop of the device. Dropping a started device
/// stops it first, which hands every in-flight buffer back to its pool.
pub struct Device {
    port_id: u16,
    driver: Box<dyn Driver>,
    diag: Arc<dyn Diagnostics>,
    state: DeviceState,
    rx: Vec<Option<RxQueue>>,
    tx: Vec<Option<TxQueue>>,
}

impl Device {
    pub fn new(port_id: u16, driver: Box<dyn Driver>, diag: Arc<dyn Diagnostics>) -> Device {
        Device {
            port_id,
            driver,
            diag,
            state: DeviceState::Unconfigured,
            rx: Vec::new(),
            tx: Vec::new(),
        }
    }

    pub fn port_id(&self) -> u16 {
        self.port_id
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    pub fn nb_rx_queues(&self) -> u16 {
        self.rx.len() as u16
    }

    pub fn nb_tx_queues(&self) -> u16 {
        self.tx.len() as u16
    }

    pub fn rx_queue_depth(&self, queue_id: u16) -> Option<u16> {
        match self.rx.get(queue_id as usize) {
            Some(Some(q)) => Some(q.depth),
            _ => None,
        }
    }

    pub fn tx_queue_depth(&self, queue_id: u16) -> Option<u16> {
        match self.tx.get(queue_id as usize) {
            Some(Some(q)) => Some(q.depth),
            _ => None,
        }
    }

    fn expect_state(&self, op: &'static str, want: DeviceState) -> Result<(), DeviceError> {
        if self.state != want {
            return Err(DeviceError::InvalidState {
                op,
                state: self.state,
            });
        }
        Ok(())
    }

    fn queues_set_up(&self) -> usize {
        self.rx.iter().flatten().count() + self.tx.iter().flatten().count()
    }

    fn update_queues_ready(&mut self) {
        if self.queues_set_up() == self.rx.len() + self.tx.len() {
            self.state = DeviceState::QueuesReady;
        }
    }

    /// Ask for `nb_rx` receive and `nb_tx` transmit queues.
    pub fn configure(&mut self, nb_rx: u16, nb_tx: u16) -> Result<(), DeviceError> {
        self.expect_state("configure", DeviceState::Unconfigured)?;
        if nb_rx == 0 && nb_tx == 0 {
            return Err(DeviceError::NoQueues);
        }

        self.driver.configure(self.port_id, nb_rx, nb_tx)?;

        self.rx = (0..nb_rx).map(|_| None).collect();
        self.tx = (0..nb_tx).map(|_| None).collect();
        self.state = DeviceState::Configured;

        debug!(port_id = self.port_id, nb_rx, nb_tx, driver = self.driver.name(), "configured");

        Ok(())
    }

    /// Set up RX queue `queue_id` with a ring of `depth` descriptors, replenished from `pool`.
    pub fn rx_queue_setup(
        &mut self,
        queue_id: u16,
        depth: u16,
        pool: &BufPool,
    ) -> Result<(), DeviceError> {
        self.expect_state("rx queue setup", DeviceState::Configured)?;
        if !is_pow_of_two(depth as usize) {
            return Err(DeviceError::InvalidDepth(depth));
        }
        match self.rx.get(queue_id as usize) {
            None => {
                return Err(DeviceError::InvalidQueue {
                    kind: QueueKind::Rx,
                    queue_id,
                })
            }
            Some(Some(_)) => {
                return Err(DeviceError::QueueExists {
                    kind: QueueKind::Rx,
                    queue_id,
                })
            }
            Some(None) => {}
        }

        self.driver.rx_queue_setup(queue_id, depth, pool)?;

        self.rx[queue_id as usize] = Some(RxQueue {
            depth,
            _pool: pool.clone(),
        });
        self.update_queues_ready();

        Ok(())
    }

    /// Set up TX queue `queue_id` with a ring of `depth` descriptors.
    pub fn tx_queue_setup(&mut self, queue_id: u16, depth: u16) -> Result<(), DeviceError> {
        self.expect_state("tx queue setup", DeviceState::Configured)?;
        if !is_pow_of_two(depth as usize) {
            return Err(DeviceError::InvalidDepth(depth));
        }
        match self.tx.get(queue_id as usize) {
            None => {
                return Err(DeviceError::InvalidQueue {
                    kind: QueueKind::Tx,
                    queue_id,
                })
            }
            Some(Some(_)) => {
                return Err(DeviceError::QueueExists {
                    kind: QueueKind::Tx,
                    queue_id,
                })
            }
            Some(None) => {}
        }

        self.driver.tx_queue_setup(queue_id, depth)?;

        self.tx[queue_id as usize] = Some(TxQueue { depth });
        self.update_queues_ready();

        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DeviceError> {
        self.expect_state("start", DeviceState::QueuesReady)?;

        self.driver.start()?;
        self.state = DeviceState::Started;

        Ok(())
    }

    /// Open the device for bursts.
    pub fn set_running(&mut self) -> Result<(), DeviceError> {
        self.expect_state("run", DeviceState::Started)?;
        self.state = DeviceState::Running;
        Ok(())
    }

    /// Stop the device. Buffers still in flight go back to their pool. Stopping a device that
    /// never started, or is already stopped, does nothing.
    pub fn stop(&mut self) {
        if !matches!(self.state, DeviceState::Started | DeviceState::Running) {
            return;
        }

        let reclaimed = self.driver.stop();
        self.state = DeviceState::Stopped;

        self.diag.report(&Event::DeviceStopped {
            port_id: self.port_id,
            reclaimed,
        });
    }

    /// Submit `batch` to TX queue `queue_id`.
    ///
    /// Returns the number of buffers the device accepted. Those were the first entries of
    /// `batch` and now belong to the device. The rejected tail is left in `batch`, still owned
    /// by the caller.
    #[inline]
    pub fn tx_burst(
        &mut self,
        queue_id: u16,
        batch: &mut Vec<BufMmap>,
    ) -> Result<usize, DeviceError> {
        if self.state != DeviceState::Running {
            return Err(DeviceError::NotRunning(self.state));
        }
        if !matches!(self.tx.get(queue_id as usize), Some(Some(_))) {
            return Err(DeviceError::InvalidQueue {
                kind: QueueKind::Tx,
                queue_id,
            });
        }

        let submitted = batch.len();
        let accepted = self.driver.tx_burst(queue_id, batch);

        if accepted > submitted || batch.len() != submitted - accepted {
            return Err(DeviceError::DriverContract(format!(
                "tx_burst reported {} of {} accepted but left {}",
                accepted,
                submitted,
                batch.len()
            )));
        }

        Ok(accepted)
    }

    /// Poll RX queue `queue_id` for at most `max` buffers, appended to `bufs`.
    ///
    /// Returns how many arrived. Zero is the normal answer when there is no traffic.
    #[inline]
    pub fn rx_burst(
        &mut self,
        queue_id: u16,
        bufs: &mut Vec<BufMmap>,
        max: usize,
    ) -> Result<usize, DeviceError> {
        if self.state != DeviceState::Running {
            return Err(DeviceError::NotRunning(self.state));
        }
        if !matches!(self.rx.get(queue_id as usize), Some(Some(_))) {
            return Err(DeviceError::InvalidQueue {
                kind: QueueKind::Rx,
                queue_id,
            });
        }

        let before = bufs.len();
        let rcvd = self.driver.rx_burst(queue_id, bufs, max);
        let appended = match bufs.len().checked_sub(before) {
            Some(appended) => appended,
            None => {
                return Err(DeviceError::DriverContract(format!(
                    "rx_burst removed {} of the caller's buffers",
                    before - bufs.len()
                )))
            }
        };

        if appended > max || appended != rcvd {
            // Nothing from a broken burst is handed out; the buffers go back to their pool.
            bufs.truncate(before);
            return Err(DeviceError::DriverContract(format!(
                "rx_burst reported {} and appended {} for a burst of {}",
                rcvd, appended, max
            )));
        }

        Ok(rcvd)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("port_id", &self.port_id)
            .field("driver", &self.driver.name())
            .field("state", &self.state)
            .field("nb_rx", &self.rx.len())
            .field("nb_tx", &self.tx.len())
            .finish()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop();

        let queues = self.queues_set_up();
        self.driver.close();
        self.rx.clear();
        self.tx.clear();

        self.diag.report(&Event::DeviceClosed {
            port_id: self.port_id,
            queues,
        });
    }
}
