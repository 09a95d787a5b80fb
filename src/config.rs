use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

// =============================================================================
// Pool settings
// =============================================================================

/// Capacity of the input and output queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueCapacity {
    /// One slot per submitted item; the dispatcher never blocks.
    #[default]
    Batch,
    /// Fixed capacity; the dispatcher blocks while the input queue is full.
    Bounded(usize),
}

impl QueueCapacity {
    pub fn capacity_for(self, batch_len: usize) -> usize {
        match self {
            QueueCapacity::Batch => batch_len,
            QueueCapacity::Bounded(capacity) => capacity,
        }
    }
}

/// What a worker does when the work function panics on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicPolicy {
    /// Halt the pool and report the item.
    #[default]
    Abort,
    /// Try the item up to `attempts` times in total before halting.
    Retry { attempts: u32 },
}

impl PanicPolicy {
    pub fn max_attempts(self) -> u32 {
        match self {
            PanicPolicy::Abort => 1,
            PanicPolicy::Retry { attempts } => attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub num_workers: usize,
    pub queue: QueueCapacity,
    pub on_panic: PanicPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            queue: QueueCapacity::default(),
            on_panic: PanicPolicy::default(),
        }
    }
}

impl PoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    pub fn with_queue(mut self, queue: QueueCapacity) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_panic_policy(mut self, on_panic: PanicPolicy) -> Self {
        self.on_panic = on_panic;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.queue == QueueCapacity::Bounded(0) {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.on_panic.max_attempts() == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        Ok(())
    }
}

// =============================================================================
// Logging settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `"debug"`.
    pub level: String,
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            thread_ids: false,
        }
    }
}

// =============================================================================
// File format
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DrillsConfig {
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

impl DrillsConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DrillsConfig = toml::from_str(content)?;
        config.pool.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}
