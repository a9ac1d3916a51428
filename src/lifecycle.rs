use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;

use crate::buf_pool::{BufPool, PoolError, PoolOptions};
use crate::config::{DriverKind, PipelineConfig};
use crate::device::{Device, DeviceError, QueueKind};
use crate::diag::{Diagnostics, Event, TracingDiagnostics};
use crate::driver::Driver;
use crate::engine::{BurstEngine, StopToken};
use crate::env::{EnvError, EnvGuard, ProcessEnv, ProcessEnvOptions, RuntimeEnv};
use crate::loopback::LoopbackDriver;
use crate::null::NullDriver;
use crate::stats::{print_stats, EngineStats};

pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_ENV_INIT: i32 = 2;
pub const EXIT_POOL_CREATE: i32 = 3;
pub const EXIT_DEVICE_CONFIGURE: i32 = 4;
pub const EXIT_QUEUE_SETUP: i32 = 5;
pub const EXIT_DEVICE_START: i32 = 6;
pub const EXIT_RUNTIME: i32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    EnvReady,
    PoolReady,
    Configured,
    QueuesReady,
    Started,
    Running,
    Stopped,
    TornDown,
}

/// A provisioning step that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    EnvInit,
    PoolCreate,
    DeviceConfigure,
    QueueSetup,
    DeviceStart,
}

impl Stage {
    pub fn exit_code(&self) -> i32 {
        match self {
            Stage::Config => EXIT_CONFIG,
            Stage::EnvInit => EXIT_ENV_INIT,
            Stage::PoolCreate => EXIT_POOL_CREATE,
            Stage::DeviceConfigure => EXIT_DEVICE_CONFIGURE,
            Stage::QueueSetup => EXIT_QUEUE_SETUP,
            Stage::DeviceStart => EXIT_DEVICE_START,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("cannot init runtime environment: {0}")]
    Env(#[source] EnvError),

    #[error("cannot create buffer pool: {0}")]
    Pool(#[source] PoolError),

    #[error("cannot configure device: {0}")]
    Configure(#[source] DeviceError),

    #[error("cannot set up {kind} queue {queue_id}: {source}")]
    QueueSetup {
        kind: QueueKind,
        queue_id: u16,
        source: DeviceError,
    },

    #[error("cannot start device: {0}")]
    Start(#[source] DeviceError),
}

impl ProvisionError {
    pub fn stage(&self) -> Stage {
        match self {
            ProvisionError::Env(_) => Stage::EnvInit,
            ProvisionError::Pool(_) => Stage::PoolCreate,
            ProvisionError::Configure(_) => Stage::DeviceConfigure,
            ProvisionError::QueueSetup { .. } => Stage::QueueSetup,
            ProvisionError::Start(_) => Stage::DeviceStart,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.stage().exit_code()
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("pipeline cannot run in state {0:?}")]
    InvalidState(LifecycleState),

    #[error("device failure: {0}")]
    Device(#[from] DeviceError),
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        EXIT_RUNTIME
    }
}

/// The external collaborators a pipeline is built from.
pub struct Collaborators {
    pub env: Box<dyn RuntimeEnv>,
    pub driver: Box<dyn Driver>,
    pub diag: Arc<dyn Diagnostics>,
}

impl Collaborators {
    /// The stock collaborators: `ProcessEnv`, the configured driver and `TracingDiagnostics`.
    pub fn from_config(config: &PipelineConfig) -> Collaborators {
        let driver: Box<dyn Driver> = match config.driver {
            DriverKind::Loopback => Box::new(LoopbackDriver::new()),
            DriverKind::Null => Box::new(NullDriver::new(config.null_rx_packet_len)),
        };

        Collaborators {
            env: Box::new(ProcessEnv::new(ProcessEnvOptions {
                lock_memory: config.lock_memory,
                core: config.core,
            })),
            driver,
            diag: Arc::new(TracingDiagnostics),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after this many loop iterations
    pub max_iterations: Option<u64>,

    /// Print a stats table this often
    pub stats_interval: Option<Duration>,
}

impl RunOptions {
    pub fn from_config(config: &PipelineConfig, max_iterations: Option<u64>) -> RunOptions {
        RunOptions {
            max_iterations,
            stats_interval: match config.stats_interval_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Destroys the pool when dropped. Outstanding buffers are flagged, not waited for.
pub struct PoolGuard {
    pool: BufPool,
    diag: Arc<dyn Diagnostics>,
}

impl PoolGuard {
    pub fn new(pool: BufPool, diag: Arc<dyn Diagnostics>) -> PoolGuard {
        PoolGuard { pool, diag }
    }

    pub fn pool(&self) -> &BufPool {
        &self.pool
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        let name = self.pool.name().to_string();
        let event = match self.pool.clone().destroy() {
            Ok(()) => Event::PoolDestroyed { name },
            Err(PoolError::BuffersOutstanding { issued }) => Event::PoolLeaked { name, issued },
            Err(_) => Event::PoolLeaked {
                name,
                issued: self.pool.issued_count(),
            },
        };
        self.diag.report(&event);
    }
}

// Last field of the pipeline, so it reports after the environment is gone.
struct TeardownReport {
    diag: Arc<dyn Diagnostics>,
}

impl Drop for TeardownReport {
    fn drop(&mut self) {
        self.diag.report(&Event::StateChanged {
            from: LifecycleState::Stopped,
            to: LifecycleState::TornDown,
        });
    }
}

fn advance(diag: &dyn Diagnostics, state: &mut LifecycleState, to: LifecycleState) {
    diag.report(&Event::StateChanged { from: *state, to });
    *state = to;
}

fn failed(diag: &dyn Diagnostics, err: ProvisionError) -> ProvisionError {
    diag.report(&Event::ProvisionFailed {
        stage: err.stage(),
        reason: err.to_string(),
    });
    err
}

/// Device Lifecycle Manager.
///
/// Owns the runtime environment, the pool and the device. Fields drop in declaration order,
/// which releases them in reverse order of acquisition: device, then pool, then environment.
pub struct Pipeline {
    device: Device,
    pool: PoolGuard,
    _env: EnvGuard,
    _teardown: TeardownReport,
    state: LifecycleState,
    diag: Arc<dyn Diagnostics>,
}

impl Pipeline {
    /// Walk Uninitialized to Started. On failure everything already acquired is released, in
    /// reverse order, before this returns.
    pub fn provision(
        config: &PipelineConfig,
        collaborators: Collaborators,
        args: &[String],
    ) -> Result<Pipeline, ProvisionError> {
        let Collaborators { env, driver, diag } = collaborators;
        let d = &*diag;
        let mut state = LifecycleState::Uninitialized;

        let env = EnvGuard::init(env, args, diag.clone())
            .map_err(|err| failed(d, ProvisionError::Env(err)))?;
        advance(d, &mut state, LifecycleState::EnvReady);

        let pool = BufPool::create_with(
            "pktburst",
            config.pool_capacity,
            config.pool_cache_size,
            config.buffer_size,
            PoolOptions {
                headroom: config.buffer_headroom,
                huge_tlb: config.huge_tlb,
            },
        )
        .map_err(|err| failed(d, ProvisionError::Pool(err)))?;
        let pool = PoolGuard::new(pool, diag.clone());
        advance(d, &mut state, LifecycleState::PoolReady);

        let mut device = Device::new(config.port_id, driver, diag.clone());
        device
            .configure(config.nb_rx_queues, config.nb_tx_queues)
            .map_err(|err| failed(d, ProvisionError::Configure(err)))?;
        advance(d, &mut state, LifecycleState::Configured);

        for queue_id in 0..config.nb_rx_queues {
            device
                .rx_queue_setup(queue_id, config.rx_queue_depth, pool.pool())
                .map_err(|source| {
                    failed(
                        d,
                        ProvisionError::QueueSetup {
                            kind: QueueKind::Rx,
                            queue_id,
                            source,
                        },
                    )
                })?;
        }
        for queue_id in 0..config.nb_tx_queues {
            device
                .tx_queue_setup(queue_id, config.tx_queue_depth)
                .map_err(|source| {
                    failed(
                        d,
                        ProvisionError::QueueSetup {
                            kind: QueueKind::Tx,
                            queue_id,
                            source,
                        },
                    )
                })?;
        }
        advance(d, &mut state, LifecycleState::QueuesReady);

        device
            .start()
            .map_err(|err| failed(d, ProvisionError::Start(err)))?;
        advance(d, &mut state, LifecycleState::Started);

        info!(
            port_id = config.port_id,
            driver = device.driver_name(),
            pool_capacity = config.pool_capacity,
            "pipeline started"
        );

        Ok(Pipeline {
            device,
            pool,
            _env: env,
            _teardown: TeardownReport { diag: diag.clone() },
            state,
            diag,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn pool(&self) -> &BufPool {
        self.pool.pool()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub fn diagnostics(&self) -> &dyn Diagnostics {
        &*self.diag
    }

    /// Poll every engine once per iteration until `stop` is set or `max_iterations` is reached,
    /// then stop the device. The stop token is only looked at between iterations.
    ///
    /// Returns the number of iterations run.
    pub fn run(
        &mut self,
        engines: &mut [&mut dyn BurstEngine],
        stop: &StopToken,
        options: &RunOptions,
    ) -> Result<u64, RunError> {
        if self.state != LifecycleState::Started {
            return Err(RunError::InvalidState(self.state));
        }
        self.device.set_running()?;
        advance(&*self.diag, &mut self.state, LifecycleState::Running);

        let mut iterations = 0u64;
        let mut last_stats = Instant::now();

        let r = loop {
            if stop.is_stopped() {
                break Ok(iterations);
            }
            if let Some(max) = options.max_iterations {
                if iterations >= max {
                    break Ok(iterations);
                }
            }

            let mut failure = None;
            for engine in engines.iter_mut() {
                if let Err(err) = engine.poll(&mut self.device, self.pool.pool(), &*self.diag) {
                    failure = Some(err);
                    break;
                }
            }
            if let Some(err) = failure {
                break Err(RunError::Device(err));
            }
            iterations += 1;

            if let Some(interval) = options.stats_interval {
                if last_stats.elapsed() >= interval {
                    print_stats(&engine_stats(engines), self.pool.pool());
                    last_stats = Instant::now();
                }
            }
        };

        self.stop();

        r
    }

    /// Stop the device. In-flight buffers go back to the pool.
    pub fn stop(&mut self) {
        if matches!(
            self.state,
            LifecycleState::Started | LifecycleState::Running
        ) {
            self.device.stop();
            advance(&*self.diag, &mut self.state, LifecycleState::Stopped);
        }
    }
}

/// Collect the counters of every engine.
pub fn engine_stats(engines: &[&mut dyn BurstEngine]) -> Vec<EngineStats> {
    engines.iter().map(|e| e.stats()).collect()
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::MemoryDiagnostics;
    use crate::payload::{CountingSink, StaticPayload};
    use crate::rx::RxEngine;
    use crate::tx::TxEngine;

    fn loopback_config() -> PipelineConfig {
        PipelineConfig {
            pool_capacity: 256,
            pool_cache_size: 16,
            buffer_size: 256,
            buffer_headroom: 64,
            rx_queue_depth: 64,
            tx_queue_depth: 64,
            driver: DriverKind::Loopback,
            stats_interval_secs: 0,
            ..Default::default()
        }
    }

    fn collaborators(config: &PipelineConfig, diag: Arc<MemoryDiagnostics>) -> Collaborators {
        Collaborators {
            diag,
            ..Collaborators::from_config(config)
        }
    }

    #[test]
    fn exit_codes_are_distinct() {
        let stages = [
            Stage::Config,
            Stage::EnvInit,
            Stage::PoolCreate,
            Stage::DeviceConfigure,
            Stage::QueueSetup,
            Stage::DeviceStart,
        ];
        let mut codes: Vec<i32> = stages.iter().map(|s| s.exit_code()).collect();
        codes.push(EXIT_OK);
        codes.push(EXIT_RUNTIME);
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), stages.len() + 2);
    }

    #[test]
    fn provision_run_and_tear_down() {
        let config = loopback_config();
        let diag = Arc::new(MemoryDiagnostics::new());
        let mut pipeline =
            Pipeline::provision(&config, collaborators(&config, diag.clone()), &[]).unwrap();
        assert_eq!(pipeline.state(), LifecycleState::Started);

        let mut tx = TxEngine::new(0, 32, StaticPayload::default());
        let mut rx = RxEngine::new(0, 32, CountingSink::default());
        let options = RunOptions {
            max_iterations: Some(100),
            stats_interval: None,
        };

        let mut engines: [&mut dyn BurstEngine; 2] = [&mut tx, &mut rx];
        let n = pipeline
            .run(&mut engines, &StopToken::new(), &options)
            .unwrap();

        assert_eq!(n, 100);
        assert_eq!(pipeline.state(), LifecycleState::Stopped);
        assert_eq!(rx.sink().packets, 100 * 32);
        assert_eq!(pipeline.pool().issued_count(), 0);

        drop(pipeline);

        let events = diag.events();
        let tail = &events[events.len() - 4..];
        assert!(matches!(tail[0], Event::DeviceClosed { .. }));
        assert!(matches!(tail[1], Event::PoolDestroyed { .. }));
        assert_eq!(tail[2], Event::EnvTornDown);
        assert_eq!(
            tail[3],
            Event::StateChanged {
                from: LifecycleState::Stopped,
                to: LifecycleState::TornDown
            }
        );
    }

    #[test]
    fn stop_token_is_honoured_before_first_iteration() {
        let config = loopback_config();
        let diag = Arc::new(MemoryDiagnostics::new());
        let mut pipeline =
            Pipeline::provision(&config, collaborators(&config, diag), &[]).unwrap();
        let mut tx = TxEngine::new(0, 8, StaticPayload::default());

        let stop = StopToken::new();
        stop.stop();

        let mut engines: [&mut dyn BurstEngine; 1] = [&mut tx];
        let n = pipeline
            .run(&mut engines, &stop, &RunOptions::default())
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(tx.tx_stats().bursts, 0);
    }

    #[test]
    fn cannot_run_twice() {
        let config = loopback_config();
        let diag = Arc::new(MemoryDiagnostics::new());
        let mut pipeline =
            Pipeline::provision(&config, collaborators(&config, diag), &[]).unwrap();
        let options = RunOptions {
            max_iterations: Some(1),
            stats_interval: None,
        };

        let mut none: [&mut dyn BurstEngine; 0] = [];
        pipeline.run(&mut none, &StopToken::new(), &options).unwrap();
        assert!(matches!(
            pipeline.run(&mut none, &StopToken::new(), &options),
            Err(RunError::InvalidState(LifecycleState::Stopped))
        ));
    }

    #[test]
    fn cache_larger_than_capacity_fails_pool_stage() {
        let mut config = loopback_config();
        config.pool_cache_size = config.pool_capacity + 1;
        let diag = Arc::new(MemoryDiagnostics::new());

        let err = Pipeline::provision(&config, collaborators(&config, diag.clone()), &[])
            .err()
            .unwrap();

        assert_eq!(err.stage(), Stage::PoolCreate);
        assert_eq!(err.exit_code(), EXIT_POOL_CREATE);
        let events = diag.events();
        assert!(matches!(
            events[events.len() - 2],
            Event::ProvisionFailed {
                stage: Stage::PoolCreate,
                ..
            }
        ));
        assert_eq!(events[events.len() - 1], Event::EnvTornDown);
    }
}
