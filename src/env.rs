use std::sync::Arc;

use rlimit::Resource;
use thiserror::Error;
use tracing::{debug, info};

use crate::diag::{Diagnostics, Event};

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("cannot raise RLIMIT_MEMLOCK: {0}")]
    MemLock(#[source] std::io::Error),

    #[error("cannot pin thread to core {0}")]
    Affinity(usize),

    #[error("{0}")]
    Failed(String),
}

/// Prepares the process before any pool or device exists, and cleans up after the last one is
/// gone.
pub trait RuntimeEnv: Send {
    fn init(&mut self, args: &[String]) -> Result<(), EnvError>;

    fn teardown(&mut self);
}

/// Configuration options for ProcessEnv
#[derive(Copy, Clone, Debug, Default)]
pub struct ProcessEnvOptions {
    /// Lift the locked memory limit, needed for huge page backed pools
    pub lock_memory: bool,

    /// Pin the polling thread to this core
    pub core: Option<usize>,
}

/// The stock runtime environment for a single polling thread.
#[derive(Debug, Default)]
pub struct ProcessEnv {
    options: ProcessEnvOptions,
}

impl ProcessEnv {
    pub fn new(options: ProcessEnvOptions) -> ProcessEnv {
        ProcessEnv { options }
    }
}

impl RuntimeEnv for ProcessEnv {
    fn init(&mut self, args: &[String]) -> Result<(), EnvError> {
        debug!(?args, "initializing runtime environment");

        if self.options.lock_memory {
            Resource::MEMLOCK
                .set(rlimit::INFINITY, rlimit::INFINITY)
                .map_err(EnvError::MemLock)?;
        }

        if let Some(id) = self.options.core {
            if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                return Err(EnvError::Affinity(id));
            }
            info!(core = id, "pinned polling thread");
        }

        Ok(())
    }

    fn teardown(&mut self) {
        debug!("runtime environment released");
    }
}

/// Holds an initialized runtime environment and tears it down when dropped.
pub struct EnvGuard {
    env: Box<dyn RuntimeEnv>,
    diag: Arc<dyn Diagnostics>,
}

impl EnvGuard {
    /// Run `init`; the guard only exists if it succeeded.
    pub fn init(
        mut env: Box<dyn RuntimeEnv>,
        args: &[String],
        diag: Arc<dyn Diagnostics>,
    ) -> Result<EnvGuard, EnvError> {
        env.init(args)?;
        Ok(EnvGuard { env, diag })
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        self.env.teardown();
        self.diag.report(&Event::EnvTornDown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::MemoryDiagnostics;

    struct FailingEnv;

    impl RuntimeEnv for FailingEnv {
        fn init(&mut self, _args: &[String]) -> Result<(), EnvError> {
            Err(EnvError::Failed("no hugepages".to_string()))
        }

        fn teardown(&mut self) {
            panic!("teardown after failed init");
        }
    }

    #[test]
    fn guard_tears_down_once() {
        let diag = Arc::new(MemoryDiagnostics::new());
        let guard = EnvGuard::init(Box::new(ProcessEnv::default()), &[], diag.clone()).unwrap();
        assert!(diag.events().is_empty());

        drop(guard);
        assert_eq!(diag.events(), vec![Event::EnvTornDown]);
    }

    #[test]
    fn failed_init_is_never_torn_down() {
        let diag = Arc::new(MemoryDiagnostics::new());
        let r = EnvGuard::init(Box::new(FailingEnv), &[], diag.clone());

        assert!(matches!(r, Err(EnvError::Failed(_))));
        assert!(diag.events().is_empty());
    }
}
