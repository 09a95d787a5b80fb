//! Bounded worker pool: fan items out to N workers, fan results back in.
//!
//! Layout of one batch:
//!
//! ```text
//!  dispatcher --jobs--> worker 0..N --outcomes--> aggregator (caller thread)
//!                          |
//!                      WaitGroup --> supervisor closes `outcomes`
//! ```
//!
//! Every queue operation that can block is a `select!` against the caller's
//! cancellation token and the pool's internal halt token, so nothing stays
//! parked on an empty or full queue once the batch is abandoned.

use crate::cancel::CancellationToken;
use crate::config::{PanicPolicy, PoolConfig};
use crate::error::{ConfigError, PoolError};
use crossbeam::channel::{self, select, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use rayon::prelude::*;
use std::any::Any;
use std::fmt::Debug;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{debug, error, trace, warn};

// =============================================================================
// Squaring pool
// =============================================================================

/// Square of `x`, widened to `i64` so `i32::MIN` squared still fits.
pub fn square(x: i32) -> i64 {
    let x = i64::from(x);
    x * x
}

/// Square every item using `num_workers` concurrent workers.
///
/// The result holds one square per input; its order is unspecified. An empty
/// work list or a zero worker count fails with [`PoolError::InvalidConfig`]
/// before any thread is spawned.
pub fn run_worker_pool(items: &[i32], num_workers: usize) -> Result<Vec<i64>, PoolError> {
    WorkerPool::with_workers(num_workers)?.run(items.to_vec(), |&x| square(x))
}

/// Order-preserving data-parallel squares on rayon's work-stealing pool.
pub fn par_squares(items: &[i32]) -> Vec<i64> {
    items.par_iter().map(|&x| square(x)).collect()
}

// =============================================================================
// Generic pool
// =============================================================================

struct Job<T> {
    index: usize,
    item: T,
}

struct Failure {
    index: usize,
    item: String,
    attempts: u32,
    message: String,
}

impl From<Failure> for PoolError {
    fn from(failure: Failure) -> Self {
        PoolError::WorkerPanic {
            index: failure.index,
            item: failure.item,
            attempts: failure.attempts,
            message: failure.message,
        }
    }
}

enum Outcome<R> {
    Done(R),
    Failed(Failure),
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn with_workers(num_workers: usize) -> Result<Self, PoolError> {
        Self::new(PoolConfig::new(num_workers))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn run<T, R, F>(&self, items: Vec<T>, work: F) -> Result<Vec<R>, PoolError>
    where
        T: Send + Debug,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        self.run_with_cancel(items, work, &CancellationToken::new())
    }

    /// Run one batch. Returns every result, or the first reason the batch
    /// could not complete.
    pub fn run_with_cancel<T, R, F>(
        &self,
        items: Vec<T>,
        work: F,
        cancel: &CancellationToken,
    ) -> Result<Vec<R>, PoolError>
    where
        T: Send + Debug,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if items.is_empty() {
            return Err(ConfigError::EmptyWorkList.into());
        }

        let submitted = items.len();
        let capacity = self.config.queue.capacity_for(submitted);
        let (job_tx, job_rx) = channel::bounded::<Job<T>>(capacity);
        let (outcome_tx, outcome_rx) = channel::bounded::<Outcome<R>>(capacity);
        let halt = CancellationToken::new();
        let wait_group = WaitGroup::new();
        // A worker beyond one per item could never receive a job.
        let workers = self.config.num_workers.min(submitted);

        debug!(submitted, workers, capacity, "starting worker pool");

        let result = thread::scope(|scope| -> Result<Vec<R>, PoolError> {
            let work = &work;
            let halt = &halt;
            let spawn_failed = |role: &'static str, source: io::Error| {
                halt.cancel();
                error!(role, %source, "failed to spawn pool thread");
                PoolError::Spawn { role, source }
            };

            for id in 0..workers {
                let worker = Worker {
                    id,
                    jobs: job_rx.clone(),
                    outcomes: outcome_tx.clone(),
                    cancel,
                    halt,
                    policy: self.config.on_panic,
                };
                let guard = wait_group.clone();
                thread::Builder::new()
                    .name(format!("pool-worker-{id}"))
                    .spawn_scoped(scope, move || {
                        worker.run(work);
                        drop(guard);
                    })
                    .map_err(|source| spawn_failed("worker", source))?;
            }
            drop(job_rx);

            thread::Builder::new()
                .name("pool-dispatcher".to_string())
                .spawn_scoped(scope, move || dispatch(items, job_tx, cancel, halt))
                .map_err(|source| spawn_failed("dispatcher", source))?;

            thread::Builder::new()
                .name("pool-supervisor".to_string())
                .spawn_scoped(scope, move || {
                    wait_group.wait();
                    drop(outcome_tx);
                })
                .map_err(|source| spawn_failed("supervisor", source))?;

            aggregate(outcome_rx, submitted, cancel, halt)
        });

        match &result {
            Ok(results) => debug!(collected = results.len(), "worker pool finished"),
            Err(err) => debug!(%err, "worker pool stopped early"),
        }
        result
    }
}

/// Feed every item into the input queue, then close it by dropping `jobs`.
fn dispatch<T>(
    items: Vec<T>,
    jobs: Sender<Job<T>>,
    cancel: &CancellationToken,
    halt: &CancellationToken,
) {
    for (index, item) in items.into_iter().enumerate() {
        if cancel.is_cancelled() || halt.is_cancelled() {
            debug!(index, "dispatch stopped");
            return;
        }
        select! {
            send(jobs, Job { index, item }) -> sent => {
                if sent.is_err() {
                    return;
                }
            }
            recv(cancel.signal()) -> _ => return,
            recv(halt.signal()) -> _ => return,
        }
    }
}

struct Worker<'a, T, R> {
    id: usize,
    jobs: Receiver<Job<T>>,
    outcomes: Sender<Outcome<R>>,
    cancel: &'a CancellationToken,
    halt: &'a CancellationToken,
    policy: PanicPolicy,
}

impl<T: Debug, R> Worker<'_, T, R> {
    fn run<F>(self, work: &F)
    where
        F: Fn(&T) -> R,
    {
        let mut processed = 0usize;
        loop {
            let job = select! {
                recv(self.jobs) -> job => match job {
                    Ok(job) => job,
                    Err(_) => break,
                },
                recv(self.cancel.signal()) -> _ => break,
                recv(self.halt.signal()) -> _ => break,
            };
            if self.stopped() {
                break;
            }

            let outcome = self.process(job, work);
            let failed = matches!(outcome, Outcome::Failed(_));
            let delivered = select! {
                send(self.outcomes, outcome) -> sent => sent.is_ok(),
                recv(self.cancel.signal()) -> _ => false,
                recv(self.halt.signal()) -> _ => false,
            };
            if !delivered || failed {
                break;
            }
            processed += 1;
        }
        trace!(worker = self.id, processed, "worker exiting");
    }

    fn stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.halt.is_cancelled()
    }

    fn process<F>(&self, job: Job<T>, work: &F) -> Outcome<R>
    where
        F: Fn(&T) -> R,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match panic::catch_unwind(AssertUnwindSafe(|| work(&job.item))) {
                Ok(value) => return Outcome::Done(value),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    if attempt < max_attempts {
                        warn!(
                            worker = self.id,
                            index = job.index,
                            attempt,
                            max_attempts,
                            %message,
                            "work panicked, retrying"
                        );
                        continue;
                    }
                    error!(
                        worker = self.id,
                        index = job.index,
                        item = ?job.item,
                        attempts = attempt,
                        %message,
                        "work panicked, halting pool"
                    );
                    return Outcome::Failed(Failure {
                        index: job.index,
                        item: format!("{:?}", job.item),
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }
}

/// Drain the output queue until every submitted item is accounted for.
fn aggregate<R>(
    outcomes: Receiver<Outcome<R>>,
    submitted: usize,
    cancel: &CancellationToken,
    halt: &CancellationToken,
) -> Result<Vec<R>, PoolError> {
    let mut collected = Vec::with_capacity(submitted);
    let cancelled = |completed| PoolError::Cancelled {
        completed,
        submitted,
    };

    while collected.len() < submitted {
        if cancel.is_cancelled() {
            return Err(cancelled(collected.len()));
        }
        select! {
            recv(outcomes) -> outcome => match outcome {
                Ok(Outcome::Done(value)) => collected.push(value),
                Ok(Outcome::Failed(failure)) => {
                    halt.cancel();
                    return Err(failure.into());
                }
                // Closed early: workers only leave a non-empty input queue once
                // the caller's token fires. Spawn failures never get here.
                Err(_) => break,
            },
            recv(cancel.signal()) -> _ => return Err(cancelled(collected.len())),
        }
    }

    if collected.len() < submitted {
        return Err(cancelled(collected.len()));
    }
    Ok(collected)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueCapacity;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn sorted<T: Ord>(mut values: Vec<T>) -> Vec<T> {
        values.sort();
        values
    }

    #[test]
    fn test_squares_reference_batch() {
        let results = run_worker_pool(&[1, 2, 3, 4, 5, 6, 7, 8], 3).unwrap();
        assert_eq!(sorted(results), vec![1, 4, 9, 16, 25, 36, 49, 64]);
    }

    #[test]
    fn test_square_extremes_do_not_overflow() {
        assert_eq!(square(i32::MIN), 1i64 << 62);
        assert_eq!(square(i32::MAX), 4_611_686_014_132_420_609);
        assert_eq!(square(-3), 9);
    }

    #[test]
    fn test_empty_work_list_is_invalid_config() {
        let err = run_worker_pool(&[], 4).unwrap_err();
        assert!(matches!(
            err,
            PoolError::InvalidConfig(ConfigError::EmptyWorkList)
        ));
    }

    #[test]
    fn test_zero_workers_is_invalid_config() {
        let err = run_worker_pool(&[1, 2, 3], 0).unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(ConfigError::ZeroWorkers)));
    }

    #[test]
    fn test_invalid_config_runs_nothing() {
        let calls = AtomicUsize::new(0);
        let pool = WorkerPool::with_workers(2).unwrap();
        let result: Result<Vec<()>, _> = pool.run(Vec::<i32>::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert!(result.unwrap_err().is_invalid_config());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_more_workers_than_items() {
        let results = run_worker_pool(&[2, 3], 16).unwrap();
        assert_eq!(sorted(results), vec![4, 9]);
    }

    #[test]
    fn test_huge_worker_count_spawns_one_thread_per_item() {
        let results = run_worker_pool(&[1, 2, 3], 100_000).unwrap();
        assert_eq!(sorted(results), vec![1, 4, 9]);
    }

    #[test]
    fn test_worker_threads_capped_at_batch_length() {
        let names = Mutex::new(std::collections::HashSet::new());
        let pool = WorkerPool::with_workers(64).unwrap();
        pool.run(vec![1, 2], |_: &i32| {
            let name = thread::current().name().map(str::to_string);
            names.lock().unwrap().insert(name);
            thread::sleep(Duration::from_millis(5));
        })
        .unwrap();
        let names = names.into_inner().unwrap();
        assert!(!names.is_empty() && names.len() <= 2);
        for name in names {
            let name = name.expect("pool threads are named");
            assert!(
                name == "pool-worker-0" || name == "pool-worker-1",
                "unexpected thread {name}"
            );
        }
    }

    #[test]
    fn test_single_worker() {
        let results = run_worker_pool(&[-1, -2, -3], 1).unwrap();
        assert_eq!(sorted(results), vec![1, 4, 9]);
    }

    #[test]
    fn test_bounded_queue_applies_backpressure() {
        let config = PoolConfig::new(3).with_queue(QueueCapacity::Bounded(1));
        let pool = WorkerPool::new(config).unwrap();
        let items: Vec<i32> = (0..200).collect();
        let results = pool.run(items.clone(), |&x| square(x)).unwrap();
        assert_eq!(sorted(results), sorted(par_squares(&items)));
    }

    #[test]
    fn test_every_item_processed_exactly_once() {
        let seen = Mutex::new(HashMap::new());
        let pool = WorkerPool::with_workers(4).unwrap();
        let items: Vec<usize> = (0..500).collect();
        let results = pool
            .run(items, |&x| {
                *seen.lock().unwrap().entry(x).or_insert(0) += 1;
                x
            })
            .unwrap();
        assert_eq!(results.len(), 500);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 500);
        assert!(seen.values().all(|&count| count == 1));
    }

    #[test]
    fn test_uses_multiple_workers() {
        let threads = Mutex::new(std::collections::HashSet::new());
        let pool = WorkerPool::with_workers(4).unwrap();
        pool.run((0..64).collect::<Vec<i32>>(), |_| {
            threads.lock().unwrap().insert(thread::current().id());
            thread::sleep(Duration::from_millis(2));
        })
        .unwrap();
        assert!(threads.lock().unwrap().len() > 1);
    }

    #[test]
    fn test_panic_aborts_and_reports_item() {
        let pool = WorkerPool::with_workers(2).unwrap();
        let err = pool
            .run(vec![1, 2, 13, 4], |&x: &i32| {
                if x == 13 {
                    panic!("unlucky item");
                }
                x
            })
            .unwrap_err();
        match err {
            PoolError::WorkerPanic {
                index,
                item,
                attempts,
                message,
            } => {
                assert_eq!(index, 2);
                assert_eq!(item, "13");
                assert_eq!(attempts, 1);
                assert_eq!(message, "unlucky item");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_panic_halts_remaining_work() {
        let calls = AtomicUsize::new(0);
        let config = PoolConfig::new(2).with_queue(QueueCapacity::Bounded(1));
        let pool = WorkerPool::new(config).unwrap();
        let items: Vec<i32> = (0..200).collect();
        let err = pool
            .run(items.clone(), |&x: &i32| {
                calls.fetch_add(1, Ordering::SeqCst);
                if x == 1 {
                    panic!("early failure");
                }
                thread::sleep(Duration::from_millis(2));
                square(x)
            })
            .unwrap_err();
        assert!(matches!(err, PoolError::WorkerPanic { index: 1, .. }));
        assert!(calls.load(Ordering::SeqCst) < items.len());
    }

    #[test]
    fn test_retry_recovers_flaky_item() {
        let failures = AtomicUsize::new(0);
        let config = PoolConfig::new(2).with_panic_policy(PanicPolicy::Retry { attempts: 2 });
        let pool = WorkerPool::new(config).unwrap();
        let results = pool
            .run(vec![1, 2, 3], |&x: &i32| {
                if x == 2 && failures.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("transient");
                }
                square(x)
            })
            .unwrap();
        assert_eq!(sorted(results), vec![1, 4, 9]);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_exhausted_reports_attempts() {
        let config = PoolConfig::new(2).with_panic_policy(PanicPolicy::Retry { attempts: 3 });
        let pool = WorkerPool::new(config).unwrap();
        let err = pool
            .run(vec!["ok", "bad"], |item: &&str| {
                if *item == "bad" {
                    panic!("{} always fails", item);
                }
            })
            .unwrap_err();
        match err {
            PoolError::WorkerPanic {
                item,
                attempts,
                message,
                ..
            } => {
                assert_eq!(item, "\"bad\"");
                assert_eq!(attempts, 3);
                assert_eq!(message, "bad always fails");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pre_cancelled_token() {
        let token = CancellationToken::new();
        token.cancel();
        let pool = WorkerPool::with_workers(3).unwrap();
        let err = pool
            .run_with_cancel((0..10).collect::<Vec<i32>>(), |&x| square(x), &token)
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::Cancelled {
                completed: 0,
                submitted: 10
            }
        ));
    }

    #[test]
    fn test_cancel_mid_run() {
        let token = CancellationToken::new();
        let config = PoolConfig::new(2).with_queue(QueueCapacity::Bounded(2));
        let pool = WorkerPool::new(config).unwrap();
        let err = pool
            .run_with_cancel(
                (0..100).collect::<Vec<i32>>(),
                |&x| {
                    if x == 10 {
                        token.cancel();
                    }
                    thread::sleep(Duration::from_millis(1));
                    square(x)
                },
                &token,
            )
            .unwrap_err();
        match err {
            PoolError::Cancelled {
                completed,
                submitted,
            } => {
                assert_eq!(submitted, 100);
                assert!(completed < submitted);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pool_is_reusable() {
        let pool = WorkerPool::with_workers(3).unwrap();
        let first = pool.run(vec![1, 2, 3], |&x: &i32| square(x)).unwrap();
        let second = pool.run(vec![1, 2, 3], |&x: &i32| square(x)).unwrap();
        assert_eq!(sorted(first), sorted(second));
    }

    #[test]
    fn test_par_squares_keeps_order() {
        assert_eq!(par_squares(&[3, -1, 2]), vec![9, 1, 4]);
    }

    #[test]
    fn test_panic_message_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
