//! Index configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bitmap::LEAF_BITS;

/// Largest supported id space
pub const MAX_ID_CEILING: u64 = 1 << 48;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("id_ceiling {0} must be a positive multiple of 4096 no larger than 2^48")]
    InvalidIdCeiling(u64),

    #[error("max_backoff_micros must be positive")]
    InvalidBackoff,

    #[error("Cannot build worker pool: {0}")]
    WorkerPool(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration shared by every index of one manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Exclusive upper bound of entity ids (default: 2^40)
    #[serde(default = "default_id_ceiling")]
    pub id_ceiling: u64,

    /// Parallel iteration pool size; 0 uses the available parallelism
    #[serde(default)]
    pub worker_threads: usize,

    /// Upper bound of the consumer poll backoff (default: 1000)
    #[serde(default = "default_max_backoff_micros")]
    pub max_backoff_micros: u64,

    /// Consolidate changed entries on `flush` (default: true)
    #[serde(default = "default_consolidate_on_flush")]
    pub consolidate_on_flush: bool,
}

fn default_id_ceiling() -> u64 {
    1 << 40
}

fn default_max_backoff_micros() -> u64 {
    1000
}

fn default_consolidate_on_flush() -> bool {
    true
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            id_ceiling: default_id_ceiling(),
            worker_threads: 0,
            max_backoff_micros: default_max_backoff_micros(),
            consolidate_on_flush: default_consolidate_on_flush(),
        }
    }
}

impl IndexConfig {
    /// Default configuration with a smaller id space
    pub fn with_id_ceiling(id_ceiling: u64) -> Self {
        Self {
            id_ceiling,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: IndexConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check every constraint
    pub fn validate(&self) -> ConfigResult<()> {
        if self.id_ceiling == 0
            || self.id_ceiling % LEAF_BITS as u64 != 0
            || self.id_ceiling > MAX_ID_CEILING
        {
            return Err(ConfigError::InvalidIdCeiling(self.id_ceiling));
        }
        if self.max_backoff_micros == 0 {
            return Err(ConfigError::InvalidBackoff);
        }
        Ok(())
    }

    /// Worker count after resolving 0 to the available parallelism
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
