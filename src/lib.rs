pub mod buf;
pub mod buf_mmap;
pub mod buf_pool;
pub mod config;
pub mod device;
pub mod diag;
pub mod driver;
pub mod engine;
pub mod env;
pub mod lifecycle;
pub mod loopback;
pub mod mmap_area;
pub mod null;
pub mod payload;
pub mod rx;
pub mod stats;
pub mod tx;

mod util;

pub use buf::{Buf, BufError};
pub use buf_mmap::BufMmap;
pub use buf_pool::{BufPool, PoolError, PoolOptions};
pub use device::{Device, DeviceError, DeviceState};
pub use diag::{Diagnostics, Event};
pub use driver::{Driver, DriverError};
pub use engine::{BurstEngine, StopToken};
pub use lifecycle::{Collaborators, Pipeline, ProvisionError, RunError, RunOptions};

/// Upper bound on `burst_size`
pub const MAX_BURST_SIZE: usize = 512;
