use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{LifecycleState, Stage};

/// Everything the pipeline reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    ProvisionFailed {
        stage: Stage,
        reason: String,
    },
    EnvTornDown,
    PoolDestroyed {
        name: String,
    },
    /// The pool was released with buffers still issued
    PoolLeaked {
        name: String,
        issued: usize,
    },
    DeviceStopped {
        port_id: u16,
        reclaimed: usize,
    },
    DeviceClosed {
        port_id: u16,
        queues: usize,
    },
    /// A TX batch came up short because the pool ran dry
    PoolExhausted {
        requested: usize,
        allocated: usize,
    },
    InsufficientTailroom {
        requested: usize,
        available: usize,
    },
    PartialTransmit {
        port_id: u16,
        queue_id: u16,
        accepted: usize,
        submitted: usize,
    },
}

/// The diagnostics sink. Reporting never fails and never affects the caller's control flow.
pub trait Diagnostics: Send + Sync {
    fn report(&self, event: &Event);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&self, event: &Event) {
        match event {
            Event::StateChanged { from, to } => debug!(?from, ?to, "lifecycle"),
            Event::ProvisionFailed { stage, reason } => error!(?stage, "{}", reason),
            Event::EnvTornDown => info!("runtime environment torn down"),
            Event::PoolDestroyed { name } => info!(pool = %name, "pool destroyed"),
            Event::PoolLeaked { name, issued } => {
                error!(pool = %name, issued, "pool released with buffers outstanding")
            }
            Event::DeviceStopped { port_id, reclaimed } => {
                info!(port_id, reclaimed, "device stopped")
            }
            Event::DeviceClosed { port_id, queues } => debug!(port_id, queues, "device closed"),
            Event::PoolExhausted {
                requested,
                allocated,
            } => debug!(requested, allocated, "failed to allocate buffers"),
            Event::InsufficientTailroom {
                requested,
                available,
            } => warn!(
                requested,
                available, "not enough room in the buffer, packet too large"
            ),
            Event::PartialTransmit {
                port_id,
                queue_id,
                accepted,
                submitted,
            } => debug!(
                port_id,
                queue_id, "not all packets sent, sent {} of {}", accepted, submitted
            ),
        }
    }
}

/// Keeps every reported event in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    events: Mutex<Vec<Event>>,
}

impl MemoryDiagnostics {
    pub fn new() -> MemoryDiagnostics {
        Default::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count<F>(&self, f: F) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        self.events.lock().iter().filter(|e| f(e)).count()
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn report(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}
