//
// Null driver: transmit completes instantly, receive fabricates frames from the queue's pool.
// Useful for measuring the pipeline itself with no device in the way.
//
use tracing::debug;

use crate::buf::Buf;
use crate::buf_mmap::BufMmap;
use crate::buf_pool::BufPool;
use crate::driver::{Driver, DriverError};

pub struct NullDriver {
    port_id: u16,
    frame: Vec<u8>,
    rx: Vec<Option<BufPool>>,
    tx: Vec<bool>,
    scratch: Vec<BufMmap>,
    started: bool,
}

impl NullDriver {
    /// `rx_packet_len` is the size of every fabricated frame; 0 means RX never returns anything
    pub fn new(rx_packet_len: usize) -> NullDriver {
        NullDriver {
            port_id: 0,
            frame: vec![0; rx_packet_len],
            rx: Vec::new(),
            tx: Vec::new(),
            scratch: Vec::new(),
            started: false,
        }
    }
}

impl Driver for NullDriver {
    fn name(&self) -> &str {
        "null"
    }

    fn configure(&mut self, port_id: u16, nb_rx: u16, nb_tx: u16) -> Result<(), DriverError> {
        self.port_id = port_id;
        self.rx = (0..nb_rx).map(|_| None).collect();
        self.tx = vec![false; nb_tx as usize];
        Ok(())
    }

    fn rx_queue_setup(
        &mut self,
        queue_id: u16,
        _depth: u16,
        pool: &BufPool,
    ) -> Result<(), DriverError> {
        let room = pool.element_size() - pool.headroom();
        if self.frame.len() > room {
            return Err(DriverError::Failed(format!(
                "{} byte frames do not fit in {} byte buffers",
                self.frame.len(),
                room
            )));
        }

        let slot = self
            .rx
            .get_mut(queue_id as usize)
            .ok_or(DriverError::NoSuchQueue(queue_id))?;
        *slot = Some(pool.clone());

        Ok(())
    }

    fn tx_queue_setup(&mut self, queue_id: u16, _depth: u16) -> Result<(), DriverError> {
        let slot = self
            .tx
            .get_mut(queue_id as usize)
            .ok_or(DriverError::NoSuchQueue(queue_id))?;
        *slot = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.started = true;
        debug!(port_id = self.port_id, "null device started");
        Ok(())
    }

    fn stop(&mut self) -> usize {
        self.started = false;
        0
    }

    fn close(&mut self) {
        self.started = false;
        self.rx.clear();
        self.tx.clear();
    }

    fn tx_burst(&mut self, queue_id: u16, batch: &mut Vec<BufMmap>) -> usize {
        if !self.started || !self.tx.get(queue_id as usize).copied().unwrap_or(false) {
            return 0;
        }

        // Transmission completes immediately, so the buffers go straight back to their pool.
        let accepted = batch.len();
        batch.clear();
        accepted
    }

    fn rx_burst(&mut self, queue_id: u16, bufs: &mut Vec<BufMmap>, max: usize) -> usize {
        if !self.started || self.frame.is_empty() {
            return 0;
        }
        let pool = match self.rx.get(queue_id as usize) {
            Some(Some(pool)) => pool,
            _ => return 0,
        };

        pool.get(&mut self.scratch, max);

        let mut rcvd = 0;
        for mut buf in self.scratch.drain(..) {
            if buf.append(&self.frame).is_ok() {
                bufs.push(buf);
                rcvd += 1;
            }
        }

        rcvd
    }
}
