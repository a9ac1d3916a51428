use crate::buf::Buf;
use crate::buf_mmap::BufMmap;
use crate::buf_pool::BufPool;
use crate::device::{Device, DeviceError};
use crate::diag::Diagnostics;
use crate::engine::BurstEngine;
use crate::payload::PayloadSink;
use crate::stats::{EngineStats, RxStats};

/// Burst Receive Engine: poll one RX queue for up to `burst_size` buffers, show each one to the
/// sink and free all of them before returning.
pub struct RxEngine<K> {
    queue_id: u16,
    burst_size: usize,
    sink: K,
    pending: Vec<BufMmap>,
    stats: RxStats,
}

impl<K: PayloadSink> RxEngine<K> {
    pub fn new(queue_id: u16, burst_size: usize, sink: K) -> RxEngine<K> {
        RxEngine {
            queue_id,
            burst_size,
            sink,
            pending: Vec::with_capacity(burst_size),
            stats: Default::default(),
        }
    }

    pub fn queue_id(&self) -> u16 {
        self.queue_id
    }

    pub fn rx_stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Run one poll. Returns how many packets arrived; zero is not an error.
    pub fn burst(&mut self, device: &mut Device, pool: &BufPool) -> Result<usize, DeviceError> {
        debug_assert!(self.pending.is_empty());

        self.stats.polls += 1;
        let rcvd = device.rx_burst(self.queue_id, &mut self.pending, self.burst_size)?;
        if rcvd == 0 {
            self.stats.empty_polls += 1;
            return Ok(0);
        }

        for buf in &self.pending {
            self.sink.on_received(buf.get_data(), buf.get_len());
            self.stats.bytes += buf.get_len() as u64;
        }
        self.stats.packets += rcvd as u64;

        // Nothing survives into the next poll.
        pool.put(&mut self.pending);

        Ok(rcvd)
    }
}

impl<K: PayloadSink> BurstEngine for RxEngine<K> {
    fn poll(
        &mut self,
        device: &mut Device,
        pool: &BufPool,
        _diag: &dyn Diagnostics,
    ) -> Result<usize, DeviceError> {
        self.burst(device, pool)
    }

    fn stats(&self) -> EngineStats {
        EngineStats::Rx {
            queue_id: self.queue_id,
            stats: self.stats,
        }
    }
}
