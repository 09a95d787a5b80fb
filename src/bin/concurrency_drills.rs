//! Walks through every concurrency drill and prints what it produced.
//!
//! Run with: cargo run --bin concurrency_drills [-- path/to/drills.toml]

use colored::Colorize;
use concurrency_drills::drills::{self, SafeCounter};
use concurrency_drills::{logging, DrillsConfig, DrillsError, PoolConfig, WorkerPool};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

const DEMO_WORKERS: usize = 3;

fn load_config() -> Result<DrillsConfig, DrillsError> {
    match std::env::args().nth(1) {
        Some(path) => Ok(DrillsConfig::from_file(Path::new(&path))?),
        None => Ok(DrillsConfig {
            pool: PoolConfig::new(DEMO_WORKERS),
            ..DrillsConfig::default()
        }),
    }
}

fn heading(number: usize, title: &str) {
    println!("\n{}", format!("=== Exercise {number}: {title} ===").bold());
}

fn run(config: &DrillsConfig) -> Result<(), DrillsError> {
    heading(1, "Spawn and Join");
    for greeting in drills::launch_greeters(5) {
        println!("{greeting}");
    }

    heading(2, "Channels");
    println!("Channel sum: {}", drills::channel_sum(5));

    heading(3, "Select");
    match drills::first_response(
        Duration::from_millis(100),
        Duration::from_millis(200),
        Duration::from_secs(1),
    ) {
        Some(reply) => println!("First received: {}", reply.as_str()),
        None => println!("No reply before the deadline"),
    }

    heading(4, "Wait Group + Mutex");
    println!("Collected: {:?}", drills::concurrent_collect(5));

    heading(5, "Mutex");
    let counter = SafeCounter::new();
    drills::hammer(&counter, 1000);
    println!("Counter: {}", counter.value());
    counter.add(1)?;
    println!("Counter after add(1): {}", counter.value());

    heading(6, "Worker Pool");
    let pool = WorkerPool::new(config.pool.clone())?;
    println!(
        "Workers: {}, queue: {:?}, on panic: {:?}",
        pool.config().num_workers,
        pool.config().queue,
        pool.config().on_panic
    );
    let results = pool.run(vec![1, 2, 3, 4, 5, 6, 7, 8], |&x| {
        concurrency_drills::square(x)
    })?;
    println!("Squared results: {:?}", results);

    Ok(())
}

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging);
    tracing::debug!(?config, "configuration loaded");

    match run(&config) {
        Ok(()) => {
            println!("\n{}", "✓ All drills completed".green());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
