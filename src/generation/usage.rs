//! In-flight operation counter

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Counts operations inside a generation so close can wait for them
#[derive(Default)]
pub struct UseCounter {
    count: Mutex<usize>,
    idle: Condvar,
}

impl UseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation; it ends when the guard drops
    pub fn enter(&self) -> UseGuard<'_> {
        *self.count.lock() += 1;
        UseGuard { counter: self }
    }

    pub fn current(&self) -> usize {
        *self.count.lock()
    }

    /// Block until no operation is in flight
    pub fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            debug!(users = *count, "waiting on in-flight operations");
            self.idle.wait(&mut count);
        }
    }

    fn leave(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

pub struct UseGuard<'a> {
    counter: &'a UseCounter,
}

impl Drop for UseGuard<'_> {
    fn drop(&mut self) {
        self.counter.leave();
    }
}
