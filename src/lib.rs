//! Concurrency drills with reference solutions.
//!
//! The centerpiece is [`pool::WorkerPool`], a bounded fan-out/fan-in pool with
//! cancellation and a per-item panic policy. [`drills`] holds the smaller
//! exercises for the primitives the pool is built from.

pub mod cancel;
pub mod config;
pub mod drills;
pub mod error;
pub mod logging;
pub mod pool;

pub use cancel::CancellationToken;
pub use config::{DrillsConfig, LoggingConfig, PanicPolicy, PoolConfig, QueueCapacity};
pub use error::{ConfigError, CounterError, DrillsError, PoolError};
pub use pool::{par_squares, run_worker_pool, square, WorkerPool};
