//
// Loopback driver: whatever is transmitted on TX queue n is received on RX queue n. Each TX
// queue owns a bounded ring of its configured depth, so a slow receiver shows up as partial
// transmit acceptance exactly like a full hardware ring would.
//
use std::cmp::min;

use arraydeque::{ArrayDeque, Saturating};
use tracing::debug;

use crate::buf_mmap::BufMmap;
use crate::buf_pool::BufPool;
use crate::driver::{Driver, DriverError};

/// Largest ring a loopback queue supports
pub const LOOPBACK_RING_MAX: usize = 4096;

type Ring = ArrayDeque<[BufMmap; LOOPBACK_RING_MAX], Saturating>;

struct TxRing {
    depth: usize,
    ring: Box<Ring>,
}

struct RxRing {
    depth: usize,
}

#[derive(Default)]
pub struct LoopbackDriver {
    port_id: u16,
    tx: Vec<Option<TxRing>>,
    rx: Vec<Option<RxRing>>,
    started: bool,
}

impl LoopbackDriver {
    pub fn new() -> LoopbackDriver {
        Default::default()
    }

    /// Buffers currently sitting in TX ring `queue_id`
    pub fn in_flight(&self, queue_id: u16) -> usize {
        match self.tx.get(queue_id as usize) {
            Some(Some(tx)) => tx.ring.len(),
            _ => 0,
        }
    }

    fn check_depth(depth: u16) -> Result<usize, DriverError> {
        let depth = depth as usize;
        if depth == 0 || depth > LOOPBACK_RING_MAX {
            return Err(DriverError::Depth {
                depth: depth as u16,
                max: LOOPBACK_RING_MAX,
            });
        }
        Ok(depth)
    }
}

impl Driver for LoopbackDriver {
    fn name(&self) -> &str {
        "loopback"
    }

    fn configure(&mut self, port_id: u16, nb_rx: u16, nb_tx: u16) -> Result<(), DriverError> {
        if nb_rx > nb_tx {
            // An RX queue without its TX twin would never see traffic.
            return Err(DriverError::QueueCount { nb_rx, nb_tx });
        }

        self.port_id = port_id;
        self.rx = (0..nb_rx).map(|_| None).collect();
        self.tx = (0..nb_tx).map(|_| None).collect();

        Ok(())
    }

    fn rx_queue_setup(
        &mut self,
        queue_id: u16,
        depth: u16,
        _pool: &BufPool,
    ) -> Result<(), DriverError> {
        let depth = LoopbackDriver::check_depth(depth)?;
        let slot = self
            .rx
            .get_mut(queue_id as usize)
            .ok_or(DriverError::NoSuchQueue(queue_id))?;

        *slot = Some(RxRing { depth });

        Ok(())
    }

    fn tx_queue_setup(&mut self, queue_id: u16, depth: u16) -> Result<(), DriverError> {
        let depth = LoopbackDriver::check_depth(depth)?;
        let slot = self
            .tx
            .get_mut(queue_id as usize)
            .ok_or(DriverError::NoSuchQueue(queue_id))?;

        *slot = Some(TxRing {
            depth,
            ring: Box::new(ArrayDeque::new()),
        });

        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.started = true;
        debug!(port_id = self.port_id, "loopback started");
        Ok(())
    }

    fn stop(&mut self) -> usize {
        self.started = false;

        let mut reclaimed = 0;
        for tx in self.tx.iter_mut().flatten() {
            reclaimed += tx.ring.len();
            // Dropping the buffers hands them back to their pool.
            tx.ring.clear();
        }

        reclaimed
    }

    fn close(&mut self) {
        self.stop();
        self.tx.clear();
        self.rx.clear();
    }

    fn tx_burst(&mut self, queue_id: u16, batch: &mut Vec<BufMmap>) -> usize {
        if !self.started {
            return 0;
        }
        let tx = match self.tx.get_mut(queue_id as usize) {
            Some(Some(tx)) => tx,
            _ => return 0,
        };

        let room = tx.depth.saturating_sub(tx.ring.len());
        let accepted = min(room, batch.len());

        for buf in batch.drain(..accepted) {
            // Cannot fail, room was checked against depth <= capacity.
            let _ = tx.ring.push_back(buf);
        }

        accepted
    }

    fn rx_burst(&mut self, queue_id: u16, bufs: &mut Vec<BufMmap>, max: usize) -> usize {
        if !self.started {
            return 0;
        }
        let depth = match self.rx.get(queue_id as usize) {
            Some(Some(rx)) => rx.depth,
            _ => return 0,
        };
        let tx = match self.tx.get_mut(queue_id as usize) {
            Some(Some(tx)) => tx,
            _ => return 0,
        };

        let ready = min(min(max, depth), tx.ring.len());
        for _ in 0..ready {
            match tx.ring.pop_front() {
                Some(buf) => bufs.push(buf),
                None => break,
            }
        }

        ready
    }
}
