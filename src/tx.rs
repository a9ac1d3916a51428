use crate::buf::{Buf, BufError};
use crate::buf_mmap::BufMmap;
use crate::buf_pool::BufPool;
use crate::device::{Device, DeviceError};
use crate::diag::{Diagnostics, Event};
use crate::engine::BurstEngine;
use crate::payload::PayloadSource;
use crate::stats::{EngineStats, TxStats};

/// What one transmit burst did.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxBurst {
    pub allocated: usize,
    pub submitted: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub tailroom_drops: usize,
}

/// Burst Transmit Engine: fill up to `burst_size` buffers from the pool, submit them to one TX
/// queue, and free exactly the part of the batch the queue refused.
pub struct TxEngine<S> {
    queue_id: u16,
    burst_size: usize,
    source: S,
    fresh: Vec<BufMmap>,
    batch: Vec<BufMmap>,
    stats: TxStats,
}

impl<S: PayloadSource> TxEngine<S> {
    pub fn new(queue_id: u16, burst_size: usize, source: S) -> TxEngine<S> {
        TxEngine {
            queue_id,
            burst_size,
            source,
            fresh: Vec::with_capacity(burst_size),
            batch: Vec::with_capacity(burst_size),
            stats: Default::default(),
        }
    }

    pub fn queue_id(&self) -> u16 {
        self.queue_id
    }

    pub fn tx_stats(&self) -> &TxStats {
        &self.stats
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Run one burst.
    pub fn burst(
        &mut self,
        device: &mut Device,
        pool: &BufPool,
        diag: &dyn Diagnostics,
    ) -> Result<TxBurst, DeviceError> {
        let mut report = TxBurst::default();

        //
        // Allocate. A short batch is still sent.
        //
        report.allocated = pool.get(&mut self.fresh, self.burst_size);
        if report.allocated < self.burst_size {
            self.stats.alloc_shortfall += (self.burst_size - report.allocated) as u64;
            diag.report(&Event::PoolExhausted {
                requested: self.burst_size,
                allocated: report.allocated,
            });
        }

        //
        // Fill. A buffer that cannot hold its payload is freed, never submitted.
        //
        for mut buf in self.fresh.drain(..) {
            match buf.append(self.source.next_payload()) {
                Ok(()) => self.batch.push(buf),
                Err(BufError::InsufficientTailroom {
                    requested,
                    available,
                }) => {
                    report.tailroom_drops += 1;
                    diag.report(&Event::InsufficientTailroom {
                        requested,
                        available,
                    });
                    pool.free(buf);
                }
                Err(BufError::InsufficientHeadroom { .. }) => pool.free(buf),
            }
        }

        //
        // Send, then free the rejected tail. Accepted buffers belong to the device now.
        //
        report.submitted = self.batch.len();
        let r = device.tx_burst(self.queue_id, &mut self.batch);
        report.rejected = pool.put(&mut self.batch);
        report.accepted = r?;

        if report.accepted < report.submitted {
            diag.report(&Event::PartialTransmit {
                port_id: device.port_id(),
                queue_id: self.queue_id,
                accepted: report.accepted,
                submitted: report.submitted,
            });
        }

        self.stats.bursts += 1;
        self.stats.submitted += report.submitted as u64;
        self.stats.accepted += report.accepted as u64;
        self.stats.rejected += report.rejected as u64;
        self.stats.tailroom_drops += report.tailroom_drops as u64;

        Ok(report)
    }
}

impl<S: PayloadSource> BurstEngine for TxEngine<S> {
    fn poll(
        &mut self,
        device: &mut Device,
        pool: &BufPool,
        diag: &dyn Diagnostics,
    ) -> Result<usize, DeviceError> {
        self.burst(device, pool, diag).map(|r| r.accepted)
    }

    fn stats(&self) -> EngineStats {
        EngineStats::Tx {
            queue_id: self.queue_id,
            stats: self.stats,
        }
    }
}
