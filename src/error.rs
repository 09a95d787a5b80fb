use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Configuration errors
// =============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("work list is empty")]
    EmptyWorkList,

    #[error("bounded queue capacity must be at least 1")]
    ZeroCapacity,

    #[error("retry policy must allow at least 1 attempt")]
    ZeroRetryAttempts,

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

// =============================================================================
// Worker pool errors
// =============================================================================

/// Outcome of a batch that did not complete.
///
/// Callers must keep a wildcard arm when matching; more failure kinds may be
/// added as the pool grows.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("worker failed on item #{index} ({item}) after {attempts} attempt(s): {message}")]
    WorkerPanic {
        index: usize,
        item: String,
        attempts: u32,
        message: String,
    },

    #[error("pool cancelled after collecting {completed} of {submitted} results")]
    Cancelled { completed: usize, submitted: usize },

    #[error("failed to spawn pool {role} thread: {source}")]
    Spawn {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl PoolError {
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, PoolError::InvalidConfig(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PoolError::Cancelled { .. })
    }
}

// =============================================================================
// Shared counter errors
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    #[error("adding {delta} to {current} overflows the counter")]
    Overflow { current: u64, delta: u64 },
}

// =============================================================================
// Driver errors
// =============================================================================

#[derive(Error, Debug)]
pub enum DrillsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Counter(#[from] CounterError),
}
