//! Parallel generation loader
//!
//! Runs one job per generation on its own thread (replay at open, close at
//! shutdown) and reports per-generation progress through the driver until
//! every job has finished.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};

use crate::error::{GenCacheError, Result};
use crate::generation::Generation;

use super::driver::StorageDriver;

/// Run `job` for every generation concurrently. Results come back in the
/// order of `generations`.
pub fn for_each_parallel<F>(
    verb: &str,
    generations: &[Arc<Generation>],
    report_interval: Duration,
    driver: &dyn StorageDriver,
    job: F,
) -> Vec<Result<()>>
where
    F: Fn(&Arc<Generation>, &AtomicU32) -> Result<()> + Sync,
{
    let progress: Vec<AtomicU32> = generations.iter().map(|_| AtomicU32::new(0)).collect();
    let mut results: Vec<Option<Result<()>>> = generations.iter().map(|_| None).collect();
    let (done_tx, done_rx) = channel::unbounded::<(usize, Result<()>)>();

    thread::scope(|scope| {
        for (i, generation) in generations.iter().enumerate() {
            let done_tx = done_tx.clone();
            let progress = &progress[i];
            let job = &job;
            scope.spawn(move || {
                let result = job(generation, progress);
                progress.store(100, Ordering::Release);
                let _ = done_tx.send((i, result));
            });
        }
        drop(done_tx);

        let mut remaining = generations.len();
        while remaining > 0 {
            match done_rx.recv_timeout(report_interval) {
                Ok((i, result)) => {
                    results[i] = Some(result);
                    remaining -= 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    report(verb, generations, &progress, driver);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    results
        .into_iter()
        .map(|result| {
            result.unwrap_or_else(|| {
                Err(GenCacheError::Corruption(
                    "generation job ended without a result".to_string(),
                ))
            })
        })
        .collect()
}

fn report(verb: &str, generations: &[Arc<Generation>], progress: &[AtomicU32], driver: &dyn StorageDriver) {
    driver.log(&format!("{}...", verb), None, false);
    for (generation, percent) in generations.iter().zip(progress) {
        driver.log(
            &format!(" {} {}%", generation.name(), percent.load(Ordering::Acquire)),
            None,
            false,
        );
    }
    driver.log("", None, true);
}
