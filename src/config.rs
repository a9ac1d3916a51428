use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use structopt::StructOpt;
use thiserror::Error;

use crate::MAX_BURST_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Loopback,
    Null,
}

impl std::str::FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loopback" => Ok(DriverKind::Loopback),
            "null" => Ok(DriverKind::Null),
            _ => Err(format!("unknown driver {}, expected loopback or null", s)),
        }
    }
}

/// Everything the pipeline needs to provision itself.
///
/// Example YAML:
/// ```yaml
/// pool_capacity: 8191
/// pool_cache_size: 250
/// burst_size: 32
/// driver: null
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub port_id: u16,

    /// Total buffers in the arena
    pub pool_capacity: usize,
    /// Fast-path reservation hint, must not exceed pool_capacity
    pub pool_cache_size: usize,
    /// Bytes per buffer, headroom included
    pub buffer_size: usize,
    pub buffer_headroom: usize,
    pub huge_tlb: bool,

    pub nb_rx_queues: u16,
    pub nb_tx_queues: u16,
    pub rx_queue_depth: u16,
    pub tx_queue_depth: u16,

    /// Max buffers per TX or RX batch
    pub burst_size: usize,

    pub driver: DriverKind,
    /// Frame length fabricated by the null driver's RX queues, 0 disables
    pub null_rx_packet_len: usize,

    pub lock_memory: bool,
    pub core: Option<usize>,

    pub payload: String,

    /// 0 disables periodic stats
    pub stats_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            port_id: 0,
            pool_capacity: 8191,
            pool_cache_size: 250,
            buffer_size: 2048 + 128,
            buffer_headroom: 128,
            huge_tlb: false,
            nb_rx_queues: 1,
            nb_tx_queues: 1,
            rx_queue_depth: 1024,
            tx_queue_depth: 1024,
            burst_size: 32,
            driver: DriverKind::Null,
            null_rx_packet_len: 64,
            lock_memory: false,
            core: None,
            payload: "Hello test!".to_string(),
            stats_interval_secs: 1,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(s: &str) -> Result<PipelineConfig, ConfigError> {
        PipelineConfig::from_yaml_str_over(s, &PipelineConfig::default())
    }

    /// Parse `s` on top of `defaults`: keys missing from the document keep the default's value.
    pub fn from_yaml_str_over(
        s: &str,
        defaults: &PipelineConfig,
    ) -> Result<PipelineConfig, ConfigError> {
        let mut merged = serde_yaml::to_value(defaults)?;

        let overrides = if s.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(s)?
        };

        match (&mut merged, overrides) {
            // An empty document overrides nothing.
            (_, Value::Null) => {}
            (Value::Mapping(base), Value::Mapping(overrides)) => {
                for (key, value) in overrides {
                    base.insert(key, value);
                }
            }
            _ => {
                return Err(ConfigError::Invalid(
                    "config file must be a mapping of options".to_string(),
                ))
            }
        }

        let config: PipelineConfig = serde_yaml::from_value(merged)?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(
        path: P,
        defaults: &PipelineConfig,
    ) -> Result<PipelineConfig, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        PipelineConfig::from_yaml_str_over(&contents, defaults)
    }

    /// Checks that belong to no provisioning stage. Pool and queue geometry is validated by the
    /// stage that uses it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.burst_size == 0 || self.burst_size > MAX_BURST_SIZE {
            return Err(ConfigError::Invalid(format!(
                "burst_size {} must be between 1 and {}",
                self.burst_size, MAX_BURST_SIZE
            )));
        }
        if self.nb_tx_queues > 0 && self.payload.is_empty() {
            return Err(ConfigError::Invalid("payload must not be empty".to_string()));
        }
        Ok(())
    }

    /// Apply command line overrides on top of the file/defaults.
    pub fn apply(&mut self, opt: &Opt) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = opt.$field.clone() { self.$field = v; })*
            };
        }
        set!(
            port_id,
            pool_capacity,
            pool_cache_size,
            buffer_size,
            buffer_headroom,
            nb_rx_queues,
            nb_tx_queues,
            rx_queue_depth,
            tx_queue_depth,
            burst_size,
            driver,
            null_rx_packet_len,
            payload,
            stats_interval_secs
        );
        if opt.core.is_some() {
            self.core = opt.core;
        }
        if opt.huge_tlb {
            self.huge_tlb = true;
        }
        if opt.lock_memory {
            self.lock_memory = true;
        }
    }
}

/// Command line shared by the sender and receiver.
#[derive(StructOpt, Debug, Default)]
pub struct Opt {
    /// YAML config file; command line options override it
    #[structopt(long)]
    pub config_file: Option<String>,

    #[structopt(long)]
    pub port_id: Option<u16>,

    #[structopt(long)]
    pub pool_capacity: Option<usize>,

    #[structopt(long)]
    pub pool_cache_size: Option<usize>,

    #[structopt(long)]
    pub buffer_size: Option<usize>,

    #[structopt(long)]
    pub buffer_headroom: Option<usize>,

    /// Use HUGE TLB
    #[structopt(long)]
    pub huge_tlb: bool,

    #[structopt(long = "rx-queues")]
    pub nb_rx_queues: Option<u16>,

    #[structopt(long = "tx-queues")]
    pub nb_tx_queues: Option<u16>,

    #[structopt(long)]
    pub rx_queue_depth: Option<u16>,

    #[structopt(long)]
    pub tx_queue_depth: Option<u16>,

    #[structopt(long)]
    pub burst_size: Option<usize>,

    /// loopback or null
    #[structopt(long)]
    pub driver: Option<DriverKind>,

    #[structopt(long)]
    pub null_rx_packet_len: Option<usize>,

    /// Raise RLIMIT_MEMLOCK before mapping buffers
    #[structopt(long)]
    pub lock_memory: bool,

    /// Pin the polling thread to this core
    #[structopt(long)]
    pub core: Option<usize>,

    #[structopt(long)]
    pub payload: Option<String>,

    #[structopt(long)]
    pub stats_interval_secs: Option<u64>,

    /// Stop after this many loop iterations
    #[structopt(long)]
    pub iterations: Option<u64>,
}

impl Opt {
    /// Build the effective config: the caller's defaults, then the YAML file, then the command
    /// line.
    pub fn load(&self, defaults: PipelineConfig) -> Result<PipelineConfig, ConfigError> {
        let mut config = match &self.config_file {
            Some(path) => PipelineConfig::from_yaml_file(path, &defaults)?,
            None => defaults,
        };
        config.apply(self);
        config.validate()?;
        Ok(config)
    }
}
