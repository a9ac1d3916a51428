use thiserror::Error;

use crate::buf_mmap::BufMmap;
use crate::buf_pool::BufPool;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("unsupported queue count: {nb_rx} rx, {nb_tx} tx")]
    QueueCount { nb_rx: u16, nb_tx: u16 },

    #[error("ring depth {depth} unsupported (max {max})")]
    Depth { depth: u16, max: usize },

    #[error("queue {0} is not configured")]
    NoSuchQueue(u16),

    #[error("{0}")]
    Failed(String),
}

/// The device driver seam. Everything a device does to the hardware goes through here.
///
/// Burst calls never block. `tx_burst` takes ownership of the first `n` entries of `batch` by
/// removing them, leaving the rejected tail in place, and returns `n`. `rx_burst` appends at most
/// `max` received buffers to `bufs` and returns how many it appended.
pub trait Driver: Send {
    fn name(&self) -> &str;

    fn configure(&mut self, port_id: u16, nb_rx: u16, nb_tx: u16) -> Result<(), DriverError>;

    /// Set up an RX ring of `depth` descriptors, replenished from `pool`
    fn rx_queue_setup(&mut self, queue_id: u16, depth: u16, pool: &BufPool)
        -> Result<(), DriverError>;

    fn tx_queue_setup(&mut self, queue_id: u16, depth: u16) -> Result<(), DriverError>;

    fn start(&mut self) -> Result<(), DriverError>;

    /// Stop the hardware and give back every buffer still in flight. Returns how many.
    fn stop(&mut self) -> usize;

    /// Release all queue resources.
    fn close(&mut self);

    fn tx_burst(&mut self, queue_id: u16, batch: &mut Vec<BufMmap>) -> usize;

    fn rx_burst(&mut self, queue_id: u16, bufs: &mut Vec<BufMmap>, max: usize) -> usize;
}
