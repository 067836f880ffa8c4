//! Configuration.
//!
//! A small TOML file covers the knobs that are not per-run: thread counts,
//! queue depth, flow-table sizing, logging. CLI flags override file values;
//! everything has a default so the file is optional.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SieveConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub flow: FlowSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Thread and queue sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Number of load-balancer (dispatcher) threads.
    pub lbs: usize,
    /// Fast-path workers per dispatcher.
    pub fps_per_lb: usize,
    /// Bounded capacity of every queue hop.
    pub queue_capacity: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            lbs: 2,
            fps_per_lb: 2,
            queue_capacity: 10_000,
        }
    }
}

/// Per-worker flow table sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSection {
    pub max_flows: usize,
    pub idle_timeout_secs: u64,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            max_flows: 100_000,
            idle_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub log_level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl SieveConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: SieveConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.lbs == 0 {
            return Err(ConfigError::Validation(
                "engine.lbs must be greater than 0".to_string(),
            ));
        }
        if self.engine.fps_per_lb == 0 {
            return Err(ConfigError::Validation(
                "engine.fps_per_lb must be greater than 0".to_string(),
            ));
        }
        if self.engine.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "engine.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.flow.max_flows == 0 {
            return Err(ConfigError::Validation(
                "flow.max_flows must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
