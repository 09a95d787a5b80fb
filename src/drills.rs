//! Small drills for the primitives the worker pool is built from.

use crate::error::CounterError;
use crossbeam::channel::{self, select};
use crossbeam::sync::WaitGroup;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Exercise 1: Spawn and join with a wait group
// =============================================================================

/// Spawn `count` threads that each produce one greeting.
///
/// Every thread holds a clone of the wait group; `wait()` returns once all
/// clones are dropped. Greeting order follows scheduling, not thread id.
pub fn launch_greeters(count: usize) -> Vec<String> {
    let wait_group = WaitGroup::new();
    let (tx, rx) = channel::unbounded();

    for id in 0..count {
        let guard = wait_group.clone();
        let tx = tx.clone();
        thread::spawn(move || {
            let _ = tx.send(format!("Hello from thread {id}"));
            drop(guard);
        });
    }
    drop(tx);

    wait_group.wait();
    rx.try_iter().collect()
}

// =============================================================================
// Exercise 2: Closing a channel to signal completion
// =============================================================================

const SUM_BUFFER: usize = 64;

// crossbeam allocates every slot of a bounded channel up front.
fn sum_buffer_capacity(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX).clamp(1, SUM_BUFFER)
}

/// Sum `1..=n` sent across a small bounded channel.
///
/// The total is a `u128`: the sum of every `u64` up to `u64::MAX` fits.
pub fn channel_sum(n: u64) -> u128 {
    let (tx, rx) = channel::bounded(sum_buffer_capacity(n));

    let producer = thread::spawn(move || {
        for value in 1..=n {
            if tx.send(value).is_err() {
                break;
            }
        }
        // `tx` drops here; the receiver's iterator ends once drained.
    });

    let sum: u128 = rx.iter().map(u128::from).sum();
    if producer.join().is_err() {
        debug!("channel_sum producer panicked");
    }
    sum
}

// =============================================================================
// Exercise 3: Select the first response
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ping,
    Pong,
}

impl Reply {
    pub fn as_str(self) -> &'static str {
        match self {
            Reply::Ping => "ping",
            Reply::Pong => "pong",
        }
    }
}

/// Race two delayed responders and return whichever arrives first.
///
/// Each responder gets a one-slot channel, so the loser's send never blocks
/// and its thread exits even though nobody reads the reply.
pub fn first_response(
    ping_delay: Duration,
    pong_delay: Duration,
    deadline: Duration,
) -> Option<Reply> {
    let (ping_tx, ping_rx) = channel::bounded(1);
    let (pong_tx, pong_rx) = channel::bounded(1);

    thread::spawn(move || {
        thread::sleep(ping_delay);
        let _ = ping_tx.send(Reply::Ping);
    });
    thread::spawn(move || {
        thread::sleep(pong_delay);
        let _ = pong_tx.send(Reply::Pong);
    });

    select! {
        recv(ping_rx) -> reply => reply.ok(),
        recv(pong_rx) -> reply => reply.ok(),
        default(deadline) => None,
    }
}

// =============================================================================
// Exercise 4: Many producers, one locked collection
// =============================================================================

/// `n` scoped threads push their id into one `Mutex<Vec<_>>`.
pub fn concurrent_collect(n: usize) -> Vec<usize> {
    let collected = Mutex::new(Vec::with_capacity(n));

    thread::scope(|scope| {
        for id in 0..n {
            let collected = &collected;
            scope.spawn(move || {
                lock(collected).push(id);
            });
        }
    });

    collected.into_inner().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Exercise 5: A counter that is only touched under its lock
// =============================================================================

#[derive(Debug, Default)]
pub struct SafeCounter {
    count: Mutex<u64>,
}

impl SafeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        let mut count = lock(&self.count);
        *count = count.saturating_add(1);
    }

    /// Add `delta`, leaving the counter unchanged on overflow.
    ///
    /// The guard is dropped on both the `Ok` and the `Err` return.
    pub fn add(&self, delta: u64) -> Result<u64, CounterError> {
        let mut count = lock(&self.count);
        let next = count.checked_add(delta).ok_or(CounterError::Overflow {
            current: *count,
            delta,
        })?;
        *count = next;
        Ok(next)
    }

    pub fn value(&self) -> u64 {
        *lock(&self.count)
    }
}

/// Increment `counter` once from each of `threads` threads.
pub fn hammer(counter: &SafeCounter, threads: usize) {
    thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| counter.increment());
        }
    });
}

// A panic while holding the lock cannot leave a half-written integer or Vec
// push behind, so the poisoned data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
