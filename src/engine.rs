use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buf_pool::BufPool;
use crate::device::{Device, DeviceError};
use crate::diag::Diagnostics;
use crate::stats::EngineStats;

/// One unit of burst work against a device queue.
///
/// `poll` runs a single burst to completion, including returning every buffer it does not hand
/// to the device, and never blocks. Between two calls the engine holds no buffers.
pub trait BurstEngine {
    fn poll(
        &mut self,
        device: &mut Device,
        pool: &BufPool,
        diag: &dyn Diagnostics,
    ) -> Result<usize, DeviceError>;

    fn stats(&self) -> EngineStats;
}

/// Shared stop flag. Checked by the run loop between bursts only.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> StopToken {
        Default::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Stop on CTRL-C
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            token.stop();
        })
    }
}
